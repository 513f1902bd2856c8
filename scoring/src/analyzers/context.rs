use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::ContextConfig;
use metrics::{counter, histogram};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::analyzers::retry::{RetryPolicy, call_with_retry};
use crate::error::{ProviderError, ScoringError, ScoringResult};
use crate::model::{
    AnalysisMetadata, BusinessContext, CONTEXT_MAX, ContextAnalysis, IdentityHash,
    LegitimacyFacets, LegitimacyJudgement, TextStatistics,
};
use crate::storage::ContextAnalysisStorage;

const PROVIDER_NAME: &str = "legitimacy";

// Suspicion weights; they add up to CONTEXT_MAX.
const LEGITIMACY_WEIGHT: f64 = 20.0;
const PLAUSIBILITY_WEIGHT: f64 = 10.0;
const COHERENCE_WEIGHT: f64 = 4.0;
const IMPOSSIBLE_CLAIM_PENALTY: f64 = 4.0;
const CULTURAL_MISMATCH_PENALTY: f64 = 2.0;

/// External language-model judge of whether feedback describes a real visit.
#[async_trait]
pub trait LegitimacyProvider: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        business_context: &BusinessContext,
    ) -> Result<LegitimacyJudgement, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ContextOutcome {
    pub analysis: ContextAnalysis,
    pub score: f64,
    pub degraded: bool,
    /// Impossible claims and cultural mismatches reported by the judge.
    pub flags: Vec<String>,
}

impl ContextOutcome {
    pub fn language(&self) -> &str {
        &self.analysis.language_detected
    }
}

/// Maps the judgement deterministically to `[0, 40]`, higher is more suspicious.
pub fn score_facets(facets: &LegitimacyFacets) -> f64 {
    let mut suspicion = (1.0 - facets.legitimacy) * LEGITIMACY_WEIGHT
        + (1.0 - facets.claim_plausibility) * PLAUSIBILITY_WEIGHT
        + (1.0 - facets.sentiment_coherence) * COHERENCE_WEIGHT;
    if !facets.impossible_claims.is_empty() {
        suspicion += IMPOSSIBLE_CLAIM_PENALTY;
    }
    if !facets.cultural_mismatches.is_empty() {
        suspicion += CULTURAL_MISMATCH_PENALTY;
    }
    ((suspicion * 100.0).round() / 100.0).clamp(0.0, CONTEXT_MAX)
}

fn check_facets(facets: &LegitimacyFacets) -> Result<(), ProviderError> {
    for (name, value) in [
        ("legitimacy", facets.legitimacy),
        ("claim_plausibility", facets.claim_plausibility),
        ("sentiment_coherence", facets.sentiment_coherence),
        ("confidence", facets.confidence),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ProviderError::Rejected(format!("{} {} outside [0, 1]", name, value)));
        }
    }
    Ok(())
}

pub struct ContextAnalyzer {
    provider: Arc<dyn LegitimacyProvider>,
    storage: Arc<dyn ContextAnalysisStorage>,
    retry: RetryPolicy,
    permits: Semaphore,
    degraded_score: f64,
}

impl ContextAnalyzer {
    pub fn new(
        config: &ContextConfig,
        provider: Arc<dyn LegitimacyProvider>,
        storage: Arc<dyn ContextAnalysisStorage>,
    ) -> ScoringResult<Self> {
        if config.max_in_flight == 0 {
            return Err(ScoringError::Config("context.max_in_flight must be positive".to_string()));
        }
        if !(0.0..=CONTEXT_MAX).contains(&config.degraded_score) {
            return Err(ScoringError::Config(format!(
                "context.degraded_score {} outside [0, {}]",
                config.degraded_score, CONTEXT_MAX
            )));
        }
        Ok(Self {
            provider,
            storage,
            retry: RetryPolicy::from(config),
            permits: Semaphore::new(config.max_in_flight),
            degraded_score: config.degraded_score,
        })
    }

    /// Free slots for external calls right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Always yields a score; provider failure degrades instead of erroring.
    /// Only persistence failures are returned as errors.
    pub async fn analyze(
        &self,
        identity_hash: &IdentityHash,
        text: &str,
        business_context: &BusinessContext,
        now: DateTime<Utc>,
    ) -> ScoringResult<ContextOutcome> {
        let call = call_with_retry(PROVIDER_NAME, &self.retry, Some(&self.permits), || async {
            let judgement = self.provider.analyze(text, business_context).await?;
            check_facets(&judgement.facets)?;
            Ok::<_, ProviderError>(judgement)
        })
        .await;

        let mut metadata = AnalysisMetadata {
            attempts: call.attempts,
            text: TextStatistics::of(text),
            ..Default::default()
        };

        let (analysis, score, degraded, flags) = match call.result {
            Ok(judgement) => {
                histogram!("feedback_scoring_context_latency_seconds")
                    .record(judgement.latency_ms as f64 / 1000.0);
                let facets = &judgement.facets;
                let score = score_facets(facets);
                metadata.impossible_claims = !facets.impossible_claims.is_empty();
                metadata.cultural_mismatch = !facets.cultural_mismatches.is_empty();
                metadata.latency_ms = judgement.latency_ms;

                let flags: Vec<String> = facets
                    .impossible_claims
                    .iter()
                    .map(|c| format!("impossible claim: {}", c))
                    .chain(facets.cultural_mismatches.iter().map(|c| format!("context mismatch: {}", c)))
                    .collect();
                let language = match facets.language.trim().to_lowercase() {
                    lang if lang.is_empty() => business_context.primary_language.to_lowercase(),
                    lang => lang,
                };

                let analysis = ContextAnalysis {
                    id: 0,
                    identity_hash: identity_hash.clone(),
                    feedback_content: text.to_string(),
                    language_detected: language,
                    business_context: business_context.clone(),
                    external_judgement: judgement.raw.clone(),
                    legitimacy_score: score,
                    confidence_score: (facets.confidence * 100.0).round() as i32,
                    analysis_metadata: metadata,
                    created_at: now,
                };
                (analysis, score, false, flags)
            }
            Err(e) => {
                counter!("feedback_scoring_degraded_total", "component" => "context").increment(1);
                warn!(identity = %identity_hash.short(), error = %e, "legitimacy judgement unavailable, degrading");
                metadata.degraded = true;
                metadata.failure = Some(e.to_string());

                let analysis = ContextAnalysis {
                    id: 0,
                    identity_hash: identity_hash.clone(),
                    feedback_content: text.to_string(),
                    language_detected: business_context.primary_language.to_lowercase(),
                    business_context: business_context.clone(),
                    external_judgement: serde_json::Value::Null,
                    legitimacy_score: self.degraded_score,
                    confidence_score: 0,
                    analysis_metadata: metadata,
                    created_at: now,
                };
                (analysis, self.degraded_score, true, Vec::new())
            }
        };

        let analysis = self.storage.insert_context_analysis(analysis).await?;
        info!(
            identity = %identity_hash.short(),
            score,
            degraded,
            language = %analysis.language_detected,
            "context analysis stored"
        );

        Ok(ContextOutcome {
            analysis,
            score,
            degraded,
            flags,
        })
    }
}
