
use async_trait::async_trait;
use chrono::Duration;
use common::config::Config;
use futures::future::join_all;
use mocks::*;
use scoring::analyzers::LegitimacyProvider;
use scoring::clock::ManualClock;
use scoring::error::{ProviderError, ScoringError};
use scoring::model::*;
use scoring::processor::{CancellationFlag, Processor, ScoreRequest, StorageSet};
use scoring::rules::RecommendedAction;
use scoring::storage::{ActivityStorage, ContextAnalysisStorage, InMemoryStorage};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Genuine verdicts that take a while; tracks how many calls overlap.
#[derive(Default)]
struct SlowProvider {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    cancel_on_call: Option<(usize, CancellationFlag)>,
}

impl SlowProvider {
    fn cancelling_on(call: usize, cancel: CancellationFlag) -> Self {
        Self {
            cancel_on_call: Some((call, cancel)),
            ..Default::default()
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegitimacyProvider for SlowProvider {
    async fn analyze(
        &self,
        _text: &str,
        _business_context: &BusinessContext,
    ) -> Result<LegitimacyJudgement, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let overlapping = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(overlapping, Ordering::SeqCst);
        if let Some((at, cancel)) = &self.cancel_on_call {
            if call == *at {
                cancel.cancel();
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(judgement(1.0, 1.0, 1.0))
    }
}

fn slow_processor(
    config: &Config,
    provider: Arc<SlowProvider>,
    storage: Arc<InMemoryStorage>,
) -> Result<Processor, Box<dyn Error + Send + Sync>> {
    Ok(Processor::from_storage(
        config,
        storage,
        provider,
        Arc::new(matcher_returning(MatchOutcome::FullMatch)),
        Arc::new(ManualClock::new(base_time())),
    )?)
}

const DISTINCT_FEEDBACK: [&str; 8] = [
    "Pho broth was rich and the herbs were fresh",
    "Waited twenty minutes for a table on Sunday",
    "Iced coffee too sweet for my taste",
    "Staff helped us choose a vegetarian dish",
    "Parking behind the shop is hard to find",
    "Bun cha portion was generous, good value",
    "Music was loud but the spring rolls made up for it",
    "Clean bathrooms, quick checkout at the counter",
];

struct Harness {
    processor: Processor,
    storage: Arc<InMemoryStorage>,
    clock: Arc<ManualClock>,
}

async fn harness(
    legitimacy: MockLegitimacyProvider,
    matcher: MockTransactionMatchProvider,
) -> Result<Harness, Box<dyn Error + Send + Sync>> {
    let storage = Arc::new(InMemoryStorage::new());
    let clock = Arc::new(ManualClock::new(base_time()));
    let processor = Processor::from_storage(
        &test_config(),
        storage.clone(),
        Arc::new(legitimacy),
        Arc::new(matcher),
        clock.clone(),
    )?;
    processor
        .keywords()
        .bulk_create(vec![
            NewKeyword::new("scam", KeywordCategory::Threats, 8, "en"),
            NewKeyword::new("terrible", KeywordCategory::Profanity, 4, "en"),
        ])
        .await?;
    Ok(Harness {
        processor,
        storage,
        clock,
    })
}

fn request(identity_hash: &IdentityHash, text: &str) -> ScoreRequest {
    ScoreRequest {
        identity_hash: identity_hash.clone(),
        feedback_text: text.to_string(),
        business_context: cafe_context(),
        claimed_transaction: Some(ClaimedTransaction {
            amount: 85_000.0,
            occurred_at: base_time() - Duration::hours(1),
        }),
        location: None,
        occurred_at: None,
    }
}

#[tokio::test]
async fn genuine_feedback_is_accepted() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let id = identity();

    let response = h
        .processor
        .compute_score(request(&id, "Lovely pho, friendly staff, will be back"))
        .await?;

    assert_eq!(response.fraud_score.composite_score, 0.0);
    assert_eq!(response.risk_level, RiskLevel::Low);
    assert!(response.contributing_factors.is_empty());
    assert!(response.degraded_components.is_empty());
    assert_eq!(response.recommendations[0].action, RecommendedAction::Accept);
    assert_eq!(h.processor.get_active_score(&id).await?, response.fraud_score);
    Ok(())
}

#[tokio::test]
async fn fabricated_feedback_combines_every_signal() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut judged = judgement(0.1, 0.2, 0.5);
    judged.facets.impossible_claims.push("ate forty bowls in one sitting".to_string());
    let h = harness(provider_returning(judged), matcher_returning(MatchOutcome::NoMatch)).await?;
    let id = identity();

    let response = h
        .processor
        .compute_score(request(&id, "Terrible scam, I ate forty bowls and they charged me twice"))
        .await?;
    let score = &response.fraud_score;

    // (0.9 * 20) + (0.8 * 10) + (0.5 * 4) + 4
    assert_eq!(score.context_score, 32.0);
    assert_eq!(score.keyword_score, 10.0);
    assert_eq!(score.behavioral_score, 0.0);
    assert_eq!(score.transaction_score, 10.0);
    assert_eq!(score.composite_score, 52.0);
    assert_eq!(score.risk_level, RiskLevel::Medium);
    assert_eq!(response.recommendations[0].action, RecommendedAction::Review);

    let analyses = h.storage.context_analyses_for_identity(&id).await?;
    assert_eq!(analyses.len(), 1);
    assert!(analyses[0].analysis_metadata.impossible_claims);
    assert_eq!(analyses[0].language_detected, "en");
    Ok(())
}

#[tokio::test]
async fn provider_outage_degrades_instead_of_failing() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut legitimacy = MockLegitimacyProvider::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    legitimacy.expect_analyze().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Timeout(200))
    });
    let mut matcher = MockTransactionMatchProvider::new();
    matcher
        .expect_match_transaction()
        .returning(|_, _| Err(ProviderError::Rejected("unknown store".to_string())));
    let h = harness(legitimacy, matcher).await?;
    let id = identity();

    let response = h.processor.compute_score(request(&id, "Nice place")).await?;

    // one try plus two retries
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(response.fraud_score.context_score, 10.0);
    assert_eq!(response.fraud_score.transaction_score, 5.0);
    assert_eq!(response.degraded_components, vec![Component::Context, Component::Transaction]);
    assert!(response.recommendations.iter().any(|r| r.action == RecommendedAction::Review));

    let analyses = h.storage.context_analyses_for_identity(&id).await?;
    assert_eq!(analyses[0].confidence_score, 0);
    assert!(analyses[0].analysis_metadata.degraded);
    assert_eq!(h.processor.context_analyzer().available_permits(), 8);
    Ok(())
}

#[tokio::test]
async fn missing_claim_is_uncertain_not_degraded() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut matcher = MockTransactionMatchProvider::new();
    matcher.expect_match_transaction().times(0);
    let h = harness(genuine_provider(), matcher).await?;

    let mut req = request(&identity(), "Good coffee");
    req.claimed_transaction = None;
    let response = h.processor.compute_score(req).await?;

    assert_eq!(response.fraud_score.transaction_score, 5.0);
    assert!(response.degraded_components.is_empty());
    Ok(())
}

#[tokio::test]
async fn rescoring_keeps_history_and_expiry_hides_stale_scores() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::PartialMatch)).await?;
    let id = identity();

    let first = h.processor.compute_score(request(&id, "Good coffee")).await?.fraud_score;
    h.clock.advance(Duration::hours(2));
    let second = h.processor.compute_score(request(&id, "Terrible wait")).await?.fraud_score;

    let history = h.processor.score_history(&id).await?;
    assert_eq!(history, vec![first, second.clone()]);
    assert_eq!(h.processor.get_active_score(&id).await?, second);

    h.clock.advance(Duration::hours(25));
    let expired = h.processor.get_active_score(&id).await;
    assert!(matches!(expired, Err(ScoringError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn burst_of_calls_raises_behavioral_score() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let id = identity();
    let texts = [
        "Pho broth was rich and the herbs were fresh",
        "Waited twenty minutes for a table on Sunday",
        "Iced coffee too sweet for my taste",
        "Staff helped us choose a vegetarian dish",
        "Parking behind the shop is hard to find",
        "Bun cha portion was generous, good value",
    ];

    let mut last = None;
    for text in texts {
        last = Some(h.processor.compute_score(request(&id, text)).await?);
        h.clock.advance(Duration::minutes(1));
    }
    let response = last.ok_or("no responses")?;

    assert!(response.fraud_score.behavioral_score > 0.0);
    let behavioral = response
        .contributing_factors
        .iter()
        .find(|f| f.component == Component::Behavioral)
        .ok_or("behavioral factor missing")?;
    assert!(behavioral.indicators.iter().any(|i| i.contains("frequency_abuse")));

    let critical = h.processor.critical_patterns(Some(0.0)).await?;
    assert_eq!(critical.len(), 1);
    let resolved = h
        .processor
        .resolve_pattern(critical[0].id, "family members sharing one phone")
        .await?;
    assert!(resolved.is_resolved);
    assert!(h.processor.critical_patterns(Some(0.0)).await?.is_empty());

    let stats = h.processor.get_statistics(DateRange::all()).await?;
    assert_eq!(stats.scores.total, 6);
    assert_eq!(stats.patterns.total, 1);
    assert_eq!(stats.patterns.resolved, 1);
    Ok(())
}

#[tokio::test]
async fn empty_feedback_is_rejected() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let result = h.processor.compute_score(request(&identity(), "   ")).await;
    assert!(matches!(result, Err(ScoringError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn persistence_failure_surfaces_to_the_caller() -> Result<(), Box<dyn Error + Send + Sync>> {
    let backend = Arc::new(InMemoryStorage::new());
    let mut fraud_scores = MockFraudScoreStorage::new();
    fraud_scores
        .expect_insert_fraud_score()
        .returning(|_| Err(ScoringError::Persistence("connection lost".to_string())));
    let storage = StorageSet {
        fraud_scores: Arc::new(fraud_scores),
        ..StorageSet::shared(backend)
    };
    let processor = Processor::new(
        &test_config(),
        storage,
        Arc::new(genuine_provider()),
        Arc::new(matcher_returning(MatchOutcome::FullMatch)),
        Arc::new(ManualClock::new(base_time())),
    )?;

    let result = processor.compute_score(request(&identity(), "Good coffee")).await;

    assert!(matches!(result, Err(ScoringError::Persistence(_))));
    Ok(())
}

#[tokio::test]
async fn batch_rescoring_reports_each_request() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let ids: Vec<IdentityHash> = (0..5).map(|_| identity()).collect();
    let mut requests: Vec<ScoreRequest> = ids.iter().map(|id| request(id, "Good coffee")).collect();
    requests.push(request(&ids[0], " "));

    let report = h.processor.rescore_batch(requests, &CancellationFlag::new()).await;

    assert_eq!(report.completed, 5);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].identity_hash, ids[0]);
    assert_eq!(report.skipped, 0);
    assert!(!report.cancelled);
    assert_eq!(h.processor.get_bulk_scores(&ids).await?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn cancelled_batch_starts_nothing_new() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let ids: Vec<IdentityHash> = (0..4).map(|_| identity()).collect();
    let requests: Vec<ScoreRequest> = ids.iter().map(|id| request(id, "Good coffee")).collect();
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let report = h.processor.rescore_batch(requests, &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.completed, 0);
    assert_eq!(report.skipped, 4);
    assert!(h.processor.get_bulk_scores(&ids).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn maintenance_cleans_scores_and_patterns() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let id = identity();
    for i in 0..6 {
        h.processor
            .compute_score(request(&id, &format!("Visit number {} was {}", i, ["fine", "ok", "good", "great", "slow", "calm"][i])))
            .await?;
    }

    h.clock.advance(Duration::days(100));
    let report = h.processor.run_maintenance().await?;

    assert_eq!(report.expired_scores_deleted, 6);
    assert!(report.patterns_auto_resolved >= 1);
    assert!(h.processor.critical_patterns(Some(0.0)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn rescoring_a_submission_is_idempotent() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let id = identity();
    let mut earlier = request(&id, DISTINCT_FEEDBACK[0]);
    earlier.occurred_at = Some(base_time() - Duration::hours(3));
    let mut submission = request(&id, "Lovely pho, friendly staff, will be back");
    submission.occurred_at = Some(base_time());

    h.processor.compute_score(earlier).await?;
    let first = h.processor.compute_score(submission.clone()).await?.fraud_score;
    h.clock.advance(Duration::hours(1));
    let second = h.processor.compute_score(submission).await?.fraud_score;

    assert!(first.behavioral_score == 0.0 && first.behavioral_score.is_sign_positive());
    assert_eq!(second.behavioral_score, first.behavioral_score);
    assert_eq!(second.composite_score, first.composite_score);
    assert_eq!(second.risk_level, first.risk_level);
    assert!(h.processor.critical_patterns(Some(0.0)).await?.is_empty());
    assert_eq!(h.storage.calls_since(&id, base_time() - Duration::days(1)).await?.len(), 2);
    assert_eq!(h.processor.score_history(&id).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn provider_outage_lowers_confidence() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut unclaimed = request(&identity(), "Nice place");
    unclaimed.claimed_transaction = None;

    let clean = harness(genuine_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let clean = clean.processor.compute_score(unclaimed.clone()).await?;
    let outage = harness(failing_provider(), matcher_returning(MatchOutcome::FullMatch)).await?;
    let outage = outage.processor.compute_score(unclaimed).await?;

    assert_eq!(outage.degraded_components, vec![Component::Context]);
    assert_eq!(outage.fraud_score.context_score, 10.0);
    assert!(outage.fraud_score.confidence_level <= clean.fraud_score.confidence_level);
    // only the neutral transaction score counts: 12.5 + 2.5
    assert_eq!(outage.fraud_score.confidence_level, 15);
    Ok(())
}

#[tokio::test]
async fn provider_calls_never_exceed_max_in_flight() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut config = test_config();
    config.context.max_in_flight = 2;
    config.processor.threads = 8;
    let provider = Arc::new(SlowProvider::default());
    let processor = slow_processor(&config, provider.clone(), Arc::new(InMemoryStorage::new()))?;
    let requests: Vec<ScoreRequest> = DISTINCT_FEEDBACK
        .iter()
        .map(|text| request(&identity(), text))
        .collect();

    let report = processor.rescore_batch(requests, &CancellationFlag::new()).await;

    assert_eq!(report.completed, 8);
    assert_eq!(provider.peak(), 2);
    assert_eq!(processor.context_analyzer().available_permits(), 2);
    Ok(())
}

#[tokio::test]
async fn cancelling_mid_batch_finishes_in_flight_work_only() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut config = test_config();
    config.processor.threads = 1;
    let cancel = CancellationFlag::new();
    let provider = Arc::new(SlowProvider::cancelling_on(2, cancel.clone()));
    let processor = slow_processor(&config, provider, Arc::new(InMemoryStorage::new()))?;
    let ids: Vec<IdentityHash> = (0..5).map(|_| identity()).collect();
    let requests: Vec<ScoreRequest> = ids.iter().map(|id| request(id, "Good coffee")).collect();

    let report = processor.rescore_batch(requests, &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped, 3);
    assert!(report.failed.is_empty());
    let scored = processor.get_bulk_scores(&ids).await?;
    assert_eq!(scored.len(), 2);
    assert!(scored.contains_key(&ids[0]) && scored.contains_key(&ids[1]));
    Ok(())
}

#[tokio::test]
async fn concurrent_scoring_of_one_identity_is_serialized() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = Arc::new(InMemoryStorage::new());
    let provider = Arc::new(SlowProvider::default());
    let processor = slow_processor(&test_config(), provider.clone(), storage.clone())?;
    let id = identity();

    let results = join_all(
        DISTINCT_FEEDBACK
            .iter()
            .map(|text| processor.compute_score(request(&id, text))),
    )
    .await;
    for result in results {
        result?;
    }

    assert_eq!(provider.peak(), 1);
    assert_eq!(storage.calls_since(&id, base_time() - Duration::days(1)).await?.len(), 8);
    let patterns = processor.critical_patterns(Some(0.0)).await?;
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].pattern_type, PatternType::FrequencyAbuse);
    // calls 6, 7 and 8 each exceed the threshold of 5
    assert_eq!(patterns[0].violation_count, 3);
    assert_eq!(processor.score_history(&id).await?.len(), 8);
    Ok(())
}
