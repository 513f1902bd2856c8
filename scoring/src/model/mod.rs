use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ScoringError, ScoringResult};

pub type ModelId = i64;

pub mod behavioral;
pub mod context;
pub mod fraud_score;
pub mod keyword;
pub mod transaction;

pub use behavioral::*;
pub use context::*;
pub use fraud_score::*;
pub use keyword::*;
pub use transaction::*;

const IDENTITY_HASH_LEN: usize = 64;

/// One-way hash of a caller's phone number (SHA-256 hex digest).
///
/// The raw number never enters the engine; this is the join key across every
/// fraud record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityHash(String);

impl IdentityHash {
    pub fn parse(value: &str) -> ScoringResult<Self> {
        let trimmed = value.trim();
        if trimmed.len() != IDENTITY_HASH_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScoringError::validation(format!(
                "identity hash must be {} hex characters, got {:?}",
                IDENTITY_HASH_LEN,
                // Never echo more than a prefix of a malformed identifier.
                trimmed.chars().take(8).collect::<String>()
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for IdentityHash {
    type Error = ScoringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdentityHash> for String {
    fn from(value: IdentityHash) -> Self {
        value.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open `[start, end)` range; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> ScoringResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ScoringError::validation(format!(
                    "date range start {} is after end {}",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at < e)
    }
}
