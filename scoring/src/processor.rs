use chrono::{DateTime, Utc};
use common::config::Config;
use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, trace, warn};

use crate::aggregator::{FraudScoreResponse, FraudScoreStatistics, ScoreAggregator, ScoreEvidence};
use crate::analyzers::{
    BehavioralPatternDetector, ContextAnalyzer, IncomingCall, KeywordDetector, LegitimacyProvider,
    RetryPolicy, TransactionMatchProvider, TransactionVerifier,
};
use crate::clock::Clock;
use crate::error::{ScoringError, ScoringResult};
use crate::model::{
    BehavioralPattern, BusinessContext, ClaimedTransaction, Component, DateRange, FraudScore, GeoPoint,
    IdentityHash, ModelId, PatternStatistics, SubScoreUpdate, SubScores,
};
use crate::pattern_store::PatternStore;
use crate::storage::{
    ActivityStorage, ContextAnalysisStorage, FraudScoreStorage, KeywordStorage, PatternStorage,
};

/// One feedback submission to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub identity_hash: IdentityHash,
    pub feedback_text: String,
    pub business_context: BusinessContext,
    #[serde(default)]
    pub claimed_transaction: Option<ClaimedTransaction>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// When the call happened; defaults to the time of scoring.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Cooperative stop signal for bulk jobs. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Serializes scoring per identity; different identities never contend.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<IdentityHash, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct IdentityGuard<'a> {
    locks: &'a IdentityLocks,
    identity_hash: IdentityHash,
    _guard: OwnedMutexGuard<()>,
}

impl IdentityLocks {
    pub async fn acquire(&self, identity_hash: &IdentityHash) -> IdentityGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(identity_hash.clone()).or_default().clone()
        };
        IdentityGuard {
            locks: self,
            identity_hash: identity_hash.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        // The map and this guard hold the only references: nobody is waiting.
        if locks
            .get(&self.identity_hash)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.identity_hash);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringStatistics {
    pub scores: FraudScoreStatistics,
    pub patterns: PatternStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub identity_hash: IdentityHash,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkRescoreReport {
    pub completed: usize,
    pub failed: Vec<BatchFailure>,
    /// Requests never started because the job was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_scores_deleted: usize,
    pub patterns_auto_resolved: usize,
}

/// Storage handles the processor is wired with.
#[derive(Clone)]
pub struct StorageSet {
    pub fraud_scores: Arc<dyn FraudScoreStorage>,
    pub patterns: Arc<dyn PatternStorage>,
    pub keywords: Arc<dyn KeywordStorage>,
    pub context_analyses: Arc<dyn ContextAnalysisStorage>,
    pub activity: Arc<dyn ActivityStorage>,
}

impl StorageSet {
    /// Every seam served by one backend.
    pub fn shared<S>(storage: Arc<S>) -> Self
    where
        S: FraudScoreStorage
            + PatternStorage
            + KeywordStorage
            + ContextAnalysisStorage
            + ActivityStorage
            + 'static,
    {
        Self {
            fraud_scores: storage.clone(),
            patterns: storage.clone(),
            keywords: storage.clone(),
            context_analyses: storage.clone(),
            activity: storage,
        }
    }
}

enum BatchOutcome {
    Completed,
    Failed(BatchFailure),
    Skipped,
}

/// Orchestrates the four analyzers and the aggregator for each submission.
pub struct Processor {
    context: ContextAnalyzer,
    keywords: KeywordDetector,
    behavioral: BehavioralPatternDetector,
    transactions: TransactionVerifier,
    patterns: Arc<PatternStore>,
    aggregator: ScoreAggregator,
    clock: Arc<dyn Clock>,
    locks: IdentityLocks,
    analysis_version: String,
    threads: usize,
    critical_pattern_threshold: f64,
}

impl Processor {
    pub fn new(
        config: &Config,
        storage: StorageSet,
        legitimacy: Arc<dyn LegitimacyProvider>,
        transaction_matcher: Arc<dyn TransactionMatchProvider>,
        clock: Arc<dyn Clock>,
    ) -> ScoringResult<Self> {
        if config.common.analysis_version.trim().is_empty() {
            return Err(ScoringError::Config("common.analysis_version must be set".to_string()));
        }
        if config.processor.threads == 0 {
            return Err(ScoringError::Config("processor.threads must be positive".to_string()));
        }
        info!(
            version = %config.common.analysis_version,
            threads = config.processor.threads,
            "Initializing scoring processor"
        );

        let patterns = Arc::new(PatternStore::new(&config.behavioral, storage.patterns));
        Ok(Self {
            context: ContextAnalyzer::new(&config.context, legitimacy, storage.context_analyses)?,
            keywords: KeywordDetector::new(&config.keywords, storage.keywords)?,
            behavioral: BehavioralPatternDetector::new(&config.behavioral, storage.activity, patterns.clone()),
            transactions: TransactionVerifier::new(transaction_matcher, RetryPolicy::from(&config.transaction)),
            patterns,
            aggregator: ScoreAggregator::new(&config.scoring, storage.fraud_scores),
            clock,
            locks: IdentityLocks::default(),
            analysis_version: config.common.analysis_version.clone(),
            threads: config.processor.threads as usize,
            critical_pattern_threshold: config.scoring.critical_pattern_threshold,
        })
    }

    pub fn from_storage<S>(
        config: &Config,
        storage: Arc<S>,
        legitimacy: Arc<dyn LegitimacyProvider>,
        transaction_matcher: Arc<dyn TransactionMatchProvider>,
        clock: Arc<dyn Clock>,
    ) -> ScoringResult<Self>
    where
        S: FraudScoreStorage
            + PatternStorage
            + KeywordStorage
            + ContextAnalysisStorage
            + ActivityStorage
            + 'static,
    {
        Self::new(config, StorageSet::shared(storage), legitimacy, transaction_matcher, clock)
    }

    /// Lexicon curation surface.
    pub fn keywords(&self) -> &KeywordDetector {
        &self.keywords
    }

    pub fn context_analyzer(&self) -> &ContextAnalyzer {
        &self.context
    }

    pub async fn compute_score(&self, request: ScoreRequest) -> ScoringResult<FraudScoreResponse> {
        if request.feedback_text.trim().is_empty() {
            return Err(ScoringError::validation("feedback text must not be empty"));
        }
        let started = Instant::now();
        let identity = request.identity_hash.clone();
        let _guard = self.locks.acquire(&identity).await;
        let now = self.clock.now();
        trace!(identity = %identity.short(), "scoring started");

        let context = self
            .context
            .analyze(&identity, &request.feedback_text, &request.business_context, now)
            .await?;
        let keywords = self.keywords.detect(&request.feedback_text, context.language()).await?;
        let behavioral = self
            .behavioral
            .analyze(
                IncomingCall {
                    identity_hash: identity.clone(),
                    occurred_at: request.occurred_at.unwrap_or(now),
                    location: request.location,
                    feedback_text: request.feedback_text,
                },
                now,
            )
            .await?;
        let transaction = self
            .transactions
            .verify(&identity, request.claimed_transaction.as_ref())
            .await;

        let mut degraded = Vec::new();
        if context.degraded {
            degraded.push(Component::Context);
        }
        if transaction.degraded {
            degraded.push(Component::Transaction);
        }

        let sub_scores = SubScores::new(context.score, keywords.score, behavioral.score, transaction.score);
        let score = self
            .aggregator
            .score_with_degradation(&identity, sub_scores, &degraded, &self.analysis_version, now)
            .await?;

        let evidence = ScoreEvidence {
            keyword_matches: keywords.matches,
            context_flags: context.flags,
            patterns: behavioral.active_patterns,
            transaction_outcome: Some(transaction.outcome),
            degraded,
        };
        let response = self.aggregator.generate_response(&score, &evidence);

        histogram!("feedback_scoring_compute_seconds").record(started.elapsed().as_secs_f64());
        debug!(
            identity = %identity.short(),
            composite = score.composite_score,
            recommendations = response.recommendations.len(),
            "scoring finished"
        );
        Ok(response)
    }

    pub async fn get_active_score(&self, identity_hash: &IdentityHash) -> ScoringResult<FraudScore> {
        self.aggregator.active_score(identity_hash, self.clock.now()).await
    }

    pub async fn get_bulk_scores(
        &self,
        identity_hashes: &[IdentityHash],
    ) -> ScoringResult<HashMap<IdentityHash, FraudScore>> {
        self.aggregator.bulk_scores(identity_hashes, self.clock.now()).await
    }

    pub async fn score_history(&self, identity_hash: &IdentityHash) -> ScoringResult<Vec<FraudScore>> {
        self.aggregator.history(identity_hash).await
    }

    pub async fn get_statistics(&self, range: DateRange) -> ScoringResult<ScoringStatistics> {
        Ok(ScoringStatistics {
            scores: self.aggregator.statistics(range).await?,
            patterns: self.patterns.statistics(range).await?,
        })
    }

    pub async fn resolve_pattern(&self, pattern_id: ModelId, notes: &str) -> ScoringResult<BehavioralPattern> {
        self.patterns.resolve(pattern_id, notes, self.clock.now()).await
    }

    /// Unresolved patterns for triage; `min_risk` defaults to the configured threshold.
    pub async fn critical_patterns(&self, min_risk: Option<f64>) -> ScoringResult<Vec<BehavioralPattern>> {
        self.patterns
            .critical_patterns(min_risk.unwrap_or(self.critical_pattern_threshold))
            .await
    }

    pub async fn correct_score(&self, score_id: ModelId, update: SubScoreUpdate) -> ScoringResult<FraudScore> {
        self.aggregator.update(score_id, update, self.clock.now()).await
    }

    /// Re-scores many submissions with bounded parallelism.
    ///
    /// Cancellation is checked before each request starts; requests already in
    /// flight run to completion, so every stored score is whole.
    pub async fn rescore_batch(&self, requests: Vec<ScoreRequest>, cancel: &CancellationFlag) -> BulkRescoreReport {
        info!(requests = requests.len(), workers = self.threads, "bulk rescoring started");

        let outcomes: Vec<BatchOutcome> = stream::iter(requests)
            .map(|request| async move {
                if cancel.is_cancelled() {
                    return BatchOutcome::Skipped;
                }
                let identity_hash = request.identity_hash.clone();
                match self.compute_score(request).await {
                    Ok(_) => BatchOutcome::Completed,
                    Err(e) => {
                        warn!(identity = %identity_hash.short(), error = %e, "rescoring failed");
                        BatchOutcome::Failed(BatchFailure {
                            identity_hash,
                            error: e.to_string(),
                        })
                    }
                }
            })
            .buffer_unordered(self.threads)
            .collect()
            .await;

        let mut report = BulkRescoreReport {
            cancelled: cancel.is_cancelled(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                BatchOutcome::Completed => report.completed += 1,
                BatchOutcome::Failed(failure) => report.failed.push(failure),
                BatchOutcome::Skipped => report.skipped += 1,
            }
        }
        info!(
            completed = report.completed,
            failed = report.failed.len(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "bulk rescoring finished"
        );
        report
    }

    pub async fn run_maintenance(&self) -> ScoringResult<MaintenanceReport> {
        let now = self.clock.now();
        let report = MaintenanceReport {
            expired_scores_deleted: self.aggregator.cleanup_expired(now).await?,
            patterns_auto_resolved: self.patterns.auto_resolve_stale(now).await?,
        };
        info!(?report, "maintenance finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(byte: &str) -> IdentityHash {
        IdentityHash::parse(&byte.repeat(32)).unwrap()
    }

    #[tokio::test]
    async fn identity_locks_are_released() {
        let locks = IdentityLocks::default();
        {
            let _a = locks.acquire(&identity("aa")).await;
            let _b = locks.acquire(&identity("bb")).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_identity_waits_for_the_holder() {
        let locks = Arc::new(IdentityLocks::default());
        let first = locks.acquire(&identity("cc")).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&identity("cc")).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
