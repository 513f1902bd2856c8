use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{IdentityHash, ModelId};

/// Snapshot of what the business actually is, for plausibility checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessContext {
    pub business_name: String,
    pub business_type: String,
    #[serde(default)]
    pub region: Option<String>,
    pub primary_language: String,
    #[serde(default)]
    pub offerings: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Structured legitimacy judgement returned by the external analyzer.
///
/// Ratios are in `[0, 1]` where 1 means "looks genuine".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegitimacyFacets {
    pub language: String,
    pub legitimacy: f64,
    pub claim_plausibility: f64,
    pub sentiment_coherence: f64,
    #[serde(default)]
    pub impossible_claims: Vec<String>,
    #[serde(default)]
    pub cultural_mismatches: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegitimacyJudgement {
    pub facets: LegitimacyFacets,
    pub raw: serde_json::Value,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStatistics {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
}

impl TextStatistics {
    pub fn of(text: &str) -> Self {
        Self {
            characters: text.chars().count(),
            words: text.split_whitespace().count(),
            sentences: text
                .split(['.', '!', '?'])
                .filter(|s| !s.trim().is_empty())
                .count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub impossible_claims: bool,
    pub cultural_mismatch: bool,
    pub degraded: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    pub failure: Option<String>,
    pub text: TextStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub id: ModelId,
    pub identity_hash: IdentityHash,
    pub feedback_content: String,
    pub language_detected: String,
    pub business_context: BusinessContext,
    /// Raw external payload; `Value::Null` when the provider never answered.
    pub external_judgement: serde_json::Value,
    pub legitimacy_score: f64,
    pub confidence_score: i32,
    pub analysis_metadata: AnalysisMetadata,
    pub created_at: DateTime<Utc>,
}
