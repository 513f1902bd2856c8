use chrono::{DateTime, Duration, Utc};
use common::config::ScoringConfig;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::error::{ScoringError, ScoringResult};
use crate::model::{
    BehavioralPattern, Component, DateRange, FraudScore, IdentityHash, KeywordMatch, MatchOutcome,
    ModelId, RiskLevel, SubScoreUpdate, SubScores,
};
use crate::rules::{Recommendation, RecommendationRule, RuleInput, default_recommendation_rules, evaluate_rules};
use crate::storage::FraudScoreStorage;

/// Band thresholds per component, highest first, with the indicator each earns.
fn band_indicators(component: Component) -> &'static [(f64, &'static str)] {
    match component {
        Component::Context => &[
            (30.0, "feedback contradicts the business context"),
            (20.0, "implausible claims for this business"),
            (10.0, "questionable feedback legitimacy"),
        ],
        Component::Keyword => &[
            (15.0, "high-severity red flag keywords"),
            (10.0, "multiple red flag keywords"),
            (5.0, "red flag keywords detected"),
        ],
        Component::Behavioral => &[
            (20.0, "severe behavioral anomalies"),
            (10.0, "repeated suspicious call activity"),
            (5.0, "unusual call activity"),
        ],
        Component::Transaction => &[
            (10.0, "no matching store transaction"),
            (5.0, "transaction could not be fully verified"),
        ],
    }
}

/// Details gathered by the analyzers, used only to explain a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvidence {
    pub keyword_matches: Vec<KeywordMatch>,
    pub context_flags: Vec<String>,
    pub patterns: Vec<BehavioralPattern>,
    pub transaction_outcome: Option<MatchOutcome>,
    pub degraded: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub component: Component,
    pub score: f64,
    pub max_score: f64,
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudScoreResponse {
    pub fraud_score: FraudScore,
    pub is_fraudulent: bool,
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<ContributingFactor>,
    pub recommendations: Vec<Recommendation>,
    pub degraded_components: Vec<Component>,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudScoreStatistics {
    pub total: usize,
    pub by_risk_level: BTreeMap<RiskLevel, usize>,
    pub fraudulent: usize,
    pub average_composite: f64,
    pub average_confidence: f64,
}

/// Owns the FraudScore lifecycle: every scoring run appends a row.
pub struct ScoreAggregator {
    storage: Arc<dyn FraudScoreStorage>,
    rules: Vec<RecommendationRule>,
    ttl: Option<Duration>,
    retention: Duration,
}

impl ScoreAggregator {
    pub fn new(config: &ScoringConfig, storage: Arc<dyn FraudScoreStorage>) -> Self {
        Self {
            storage,
            rules: default_recommendation_rules(),
            // A non-positive TTL means scores never expire.
            ttl: (config.score_ttl_hours > 0).then(|| Duration::hours(config.score_ttl_hours)),
            retention: Duration::days(config.retention_days),
        }
    }

    pub fn with_rules(mut self, rules: Vec<RecommendationRule>) -> Self {
        self.rules = rules;
        self
    }

    pub async fn score(
        &self,
        identity_hash: &IdentityHash,
        sub_scores: SubScores,
        analysis_version: &str,
        now: DateTime<Utc>,
    ) -> ScoringResult<FraudScore> {
        self.score_with_degradation(identity_hash, sub_scores, &[], analysis_version, now)
            .await
    }

    /// Records a score whose `degraded` components hold fallback values.
    pub async fn score_with_degradation(
        &self,
        identity_hash: &IdentityHash,
        sub_scores: SubScores,
        degraded: &[Component],
        analysis_version: &str,
        now: DateTime<Utc>,
    ) -> ScoringResult<FraudScore> {
        let expires_at = self.ttl.map(|ttl| now + ttl);
        let mut score = FraudScore::new(identity_hash.clone(), sub_scores, analysis_version, expires_at, now)?;
        score.discount_degraded(degraded);
        let score = self.storage.insert_fraud_score(score).await?;

        counter!("feedback_scoring_scores_total", "risk_level" => score.risk_level.to_string()).increment(1);
        info!(
            identity = %identity_hash.short(),
            score_id = score.id,
            composite = score.composite_score,
            risk_level = %score.risk_level,
            version = analysis_version,
            "fraud score recorded"
        );
        Ok(score)
    }

    /// In-place correction; derived fields are recomputed with the edit.
    pub async fn update(
        &self,
        score_id: ModelId,
        update: SubScoreUpdate,
        now: DateTime<Utc>,
    ) -> ScoringResult<FraudScore> {
        if update.is_empty() {
            return Err(ScoringError::validation("score correction changes nothing"));
        }
        let current = self
            .storage
            .get_fraud_score(score_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("fraud score", score_id))?;
        let corrected = current.corrected(&update, now)?;
        self.storage.replace_fraud_score(&corrected).await?;
        info!(
            score_id,
            from = current.composite_score,
            to = corrected.composite_score,
            "fraud score corrected"
        );
        Ok(corrected)
    }

    pub async fn active_score(
        &self,
        identity_hash: &IdentityHash,
        now: DateTime<Utc>,
    ) -> ScoringResult<FraudScore> {
        self.storage
            .latest_active_fraud_score(identity_hash, now)
            .await?
            .ok_or_else(|| ScoringError::not_found("active fraud score", identity_hash.short()))
    }

    /// Most recent row per identity; identities whose latest row expired are omitted.
    pub async fn bulk_scores(
        &self,
        identity_hashes: &[IdentityHash],
        now: DateTime<Utc>,
    ) -> ScoringResult<HashMap<IdentityHash, FraudScore>> {
        let mut latest = self.storage.latest_fraud_scores(identity_hashes).await?;
        latest.retain(|_, score| !score.is_expired(now));
        debug!(requested = identity_hashes.len(), found = latest.len(), "bulk score lookup");
        Ok(latest)
    }

    pub async fn history(&self, identity_hash: &IdentityHash) -> ScoringResult<Vec<FraudScore>> {
        self.storage.fraud_score_history(identity_hash).await
    }

    pub async fn statistics(&self, range: DateRange) -> ScoringResult<FraudScoreStatistics> {
        let scores = self.storage.fraud_scores_created_in(range).await?;
        let mut stats = FraudScoreStatistics {
            total: scores.len(),
            by_risk_level: RiskLevel::iter().map(|level| (level, 0)).collect(),
            ..Default::default()
        };
        for score in &scores {
            *stats.by_risk_level.entry(score.risk_level).or_default() += 1;
            if score.is_fraudulent {
                stats.fraudulent += 1;
            }
        }
        if !scores.is_empty() {
            let n = scores.len() as f64;
            stats.average_composite = scores.iter().map(|s| s.composite_score).sum::<f64>() / n;
            stats.average_confidence = scores.iter().map(|s| s.confidence_level as f64).sum::<f64>() / n;
        }
        Ok(stats)
    }

    /// Deletes rows that expired more than `retention_days` ago.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> ScoringResult<usize> {
        let deleted = self
            .storage
            .delete_fraud_scores_expired_before(now - self.retention)
            .await?;
        info!(deleted, "expired fraud scores removed");
        Ok(deleted)
    }

    pub fn generate_response(&self, score: &FraudScore, evidence: &ScoreEvidence) -> FraudScoreResponse {
        let sub_scores = score.sub_scores();
        let contributing_factors: Vec<ContributingFactor> = Component::iter()
            .filter(|c| sub_scores.get(*c) > 0.0)
            .map(|component| ContributingFactor {
                component,
                score: sub_scores.get(component),
                max_score: component.max_score(),
                indicators: indicators_for(component, sub_scores.get(component), evidence),
            })
            .collect();

        let input = RuleInput {
            sub_scores,
            composite: score.composite_score,
            confidence: score.confidence_level,
            risk_level: score.risk_level,
            degraded: evidence.degraded.clone(),
        };
        let recommendations = evaluate_rules(&self.rules, &input);

        FraudScoreResponse {
            fraud_score: score.clone(),
            is_fraudulent: score.is_fraudulent,
            risk_level: score.risk_level,
            explanation: explain(score, &evidence.degraded),
            contributing_factors,
            recommendations,
            degraded_components: evidence.degraded.clone(),
        }
    }
}

fn indicators_for(component: Component, value: f64, evidence: &ScoreEvidence) -> Vec<String> {
    let mut indicators: Vec<String> = band_indicators(component)
        .iter()
        .find(|(min, _)| value >= *min)
        .map(|(_, label)| label.to_string())
        .into_iter()
        .collect();

    match component {
        Component::Context => indicators.extend(evidence.context_flags.iter().cloned()),
        Component::Keyword => indicators.extend(
            evidence
                .keyword_matches
                .iter()
                .map(|m| format!("'{}' ({}, severity {})", m.keyword, m.category, m.severity)),
        ),
        Component::Behavioral => indicators.extend(evidence.patterns.iter().map(|p| {
            format!(
                "{} pattern, {} violation(s), risk {:.1}",
                p.pattern_type, p.violation_count, p.risk_score
            )
        })),
        Component::Transaction => {
            if let Some(outcome) = evidence.transaction_outcome {
                indicators.push(format!("transaction check: {}", outcome));
            }
        }
    }
    if evidence.degraded.contains(&component) {
        indicators.push("analysis degraded, conservative default applied".to_string());
    }
    indicators
}

fn explain(score: &FraudScore, degraded: &[Component]) -> String {
    let mut text = format!(
        "Composite {:.1}/100 ({} risk, confidence {}): context {:.1}/40, keyword {:.1}/20, behavioral {:.1}/30, transaction {:.1}/10.",
        score.composite_score,
        score.risk_level,
        score.confidence_level,
        score.context_score,
        score.keyword_score,
        score.behavioral_score,
        score.transaction_score,
    );
    if !degraded.is_empty() {
        let names: Vec<String> = degraded.iter().map(|c| c.to_string()).collect();
        text.push_str(&format!(" Degraded: {}.", names.join(", ")));
    }
    text
}
