use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

/// The purchase the caller claims to have made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTransaction {
    pub amount: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchOutcome {
    FullMatch,
    PartialMatch,
    NoMatch,
    Unavailable,
}

impl MatchOutcome {
    pub fn score(&self) -> f64 {
        match self {
            MatchOutcome::FullMatch => 0.0,
            MatchOutcome::PartialMatch => 5.0,
            MatchOutcome::NoMatch => 10.0,
            // Uncertain, so neither trusted nor condemned.
            MatchOutcome::Unavailable => 5.0,
        }
    }
}
