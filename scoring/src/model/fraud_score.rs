use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumIter, EnumString};

use super::{IdentityHash, ModelId};
use crate::error::{ScoringError, ScoringResult};

pub const CONTEXT_MAX: f64 = 40.0;
pub const KEYWORD_MAX: f64 = 20.0;
pub const BEHAVIORAL_MAX: f64 = 30.0;
pub const TRANSACTION_MAX: f64 = 10.0;

pub const CRITICAL_THRESHOLD: f64 = 85.0;
pub const HIGH_THRESHOLD: f64 = 70.0;
pub const MEDIUM_THRESHOLD: f64 = 40.0;
pub const FRAUDULENT_THRESHOLD: f64 = 70.0;

/// The four analyzers feeding the composite score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Component {
    Context,
    Keyword,
    Behavioral,
    Transaction,
}

impl Component {
    pub fn max_score(&self) -> f64 {
        match self {
            Component::Context => CONTEXT_MAX,
            Component::Keyword => KEYWORD_MAX,
            Component::Behavioral => BEHAVIORAL_MAX,
            Component::Transaction => TRANSACTION_MAX,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Step function over the composite score with inclusive lower bounds.
    pub fn from_composite(composite: f64) -> Self {
        if composite >= CRITICAL_THRESHOLD {
            RiskLevel::Critical
        } else if composite >= HIGH_THRESHOLD {
            RiskLevel::High
        } else if composite >= MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Already-weighted component scores, each within its own `[0, max]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub context: f64,
    pub keyword: f64,
    pub behavioral: f64,
    pub transaction: f64,
}

impl SubScores {
    pub fn new(context: f64, keyword: f64, behavioral: f64, transaction: f64) -> Self {
        Self {
            context,
            keyword,
            behavioral,
            transaction,
        }
    }

    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::Context => self.context,
            Component::Keyword => self.keyword,
            Component::Behavioral => self.behavioral,
            Component::Transaction => self.transaction,
        }
    }

    fn entries(&self) -> [(Component, f64); 4] {
        [
            (Component::Context, self.context),
            (Component::Keyword, self.keyword),
            (Component::Behavioral, self.behavioral),
            (Component::Transaction, self.transaction),
        ]
    }

    /// Out-of-bound values are rejected, never clamped.
    pub fn validate(&self) -> ScoringResult<()> {
        for (component, value) in self.entries() {
            if !value.is_finite() || value < 0.0 || value > component.max_score() {
                return Err(ScoringError::validation(format!(
                    "{} score {} outside [0, {}]",
                    component,
                    value,
                    component.max_score()
                )));
            }
        }
        Ok(())
    }

    pub fn composite(&self) -> f64 {
        self.context + self.keyword + self.behavioral + self.transaction
    }

    pub fn contributing_components(&self) -> usize {
        self.entries().iter().filter(|(_, v)| *v > 0.0).count()
    }

    /// Same values with the listed components zeroed.
    pub fn without(&self, components: &[Component]) -> Self {
        let mut trusted = *self;
        for component in components {
            match component {
                Component::Context => trusted.context = 0.0,
                Component::Keyword => trusted.keyword = 0.0,
                Component::Behavioral => trusted.behavioral = 0.0,
                Component::Transaction => trusted.transaction = 0.0,
            }
        }
        trusted
    }
}

/// Partial correction of a stored score; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScoreUpdate {
    pub context: Option<f64>,
    pub keyword: Option<f64>,
    pub behavioral: Option<f64>,
    pub transaction: Option<f64>,
}

impl SubScoreUpdate {
    pub fn apply_to(&self, current: SubScores) -> SubScores {
        SubScores {
            context: self.context.unwrap_or(current.context),
            keyword: self.keyword.unwrap_or(current.keyword),
            behavioral: self.behavioral.unwrap_or(current.behavioral),
            transaction: self.transaction.unwrap_or(current.transaction),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_none()
            && self.keyword.is_none()
            && self.behavioral.is_none()
            && self.transaction.is_none()
    }
}

pub fn fraud_probability(composite: f64) -> f64 {
    (composite / 100.0).min(1.0)
}

/// Half from how many components contributed, half from how large the total is.
///
/// Degraded components carry fallback values, not evidence, so they add to
/// neither half.
pub fn confidence_level(sub_scores: &SubScores, degraded: &[Component]) -> i32 {
    let trusted = sub_scores.without(degraded);
    let component_part = 50.0 * trusted.contributing_components() as f64 / 4.0;
    let magnitude_part = 50.0 * (trusted.composite() / 100.0).min(1.0);
    ((component_part + magnitude_part).round() as i32).clamp(0, 100)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudScore {
    pub id: ModelId,
    pub identity_hash: IdentityHash,
    pub context_score: f64,
    pub keyword_score: f64,
    pub behavioral_score: f64,
    pub transaction_score: f64,
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub fraud_probability: f64,
    pub confidence_level: i32,
    pub is_fraudulent: bool,
    pub analysis_version: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FraudScore {
    /// Builds an unsaved record (`id == 0`); storage assigns the id.
    pub fn new(
        identity_hash: IdentityHash,
        sub_scores: SubScores,
        analysis_version: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ScoringResult<Self> {
        if analysis_version.trim().is_empty() {
            return Err(ScoringError::validation("analysis version must not be empty"));
        }
        let mut score = Self {
            id: 0,
            identity_hash,
            context_score: 0.0,
            keyword_score: 0.0,
            behavioral_score: 0.0,
            transaction_score: 0.0,
            composite_score: 0.0,
            risk_level: RiskLevel::Low,
            fraud_probability: 0.0,
            confidence_level: 0,
            is_fraudulent: false,
            analysis_version: analysis_version.to_string(),
            expires_at,
            created_at: now,
            updated_at: now,
        };
        score.set_sub_scores(sub_scores)?;
        Ok(score)
    }

    pub fn sub_scores(&self) -> SubScores {
        SubScores::new(
            self.context_score,
            self.keyword_score,
            self.behavioral_score,
            self.transaction_score,
        )
    }

    /// The only way sub-scores change: every derived field is recomputed together.
    fn set_sub_scores(&mut self, sub_scores: SubScores) -> ScoringResult<()> {
        sub_scores.validate()?;
        let composite = sub_scores.composite();
        self.context_score = sub_scores.context;
        self.keyword_score = sub_scores.keyword;
        self.behavioral_score = sub_scores.behavioral;
        self.transaction_score = sub_scores.transaction;
        self.composite_score = composite;
        self.risk_level = RiskLevel::from_composite(composite);
        self.fraud_probability = fraud_probability(composite);
        self.confidence_level = confidence_level(&sub_scores, &[]);
        self.is_fraudulent = composite >= FRAUDULENT_THRESHOLD;
        Ok(())
    }

    /// Returns the corrected copy; `self` stays untouched if validation fails.
    pub fn corrected(&self, update: &SubScoreUpdate, now: DateTime<Utc>) -> ScoringResult<Self> {
        let mut next = self.clone();
        next.set_sub_scores(update.apply_to(self.sub_scores()))?;
        next.updated_at = now;
        Ok(next)
    }

    /// Lowers confidence for components that fell back to a default.
    pub fn discount_degraded(&mut self, degraded: &[Component]) {
        self.confidence_level = confidence_level(&self.sub_scores(), degraded);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
