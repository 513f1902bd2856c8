use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumIter, EnumString};

use super::ModelId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeywordCategory {
    Profanity,
    Threats,
    Nonsensical,
    Impossible,
}

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagKeyword {
    pub id: ModelId,
    pub keyword: String,
    pub category: KeywordCategory,
    pub severity_level: u8,
    pub language_code: String,
    /// Regular expression for morphological or fuzzy variants.
    pub detection_pattern: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Curation input for bulk creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKeyword {
    pub keyword: String,
    pub category: KeywordCategory,
    pub severity_level: u8,
    pub language_code: String,
    #[serde(default)]
    pub detection_pattern: Option<String>,
}

impl NewKeyword {
    pub fn new(keyword: &str, category: KeywordCategory, severity_level: u8, language_code: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            category,
            severity_level,
            language_code: language_code.to_string(),
            detection_pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.detection_pattern = Some(pattern.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub keyword_id: ModelId,
    pub keyword: String,
    pub category: KeywordCategory,
    pub severity: u8,
    /// Times the keyword hit in the text; scored once regardless.
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordDetection {
    pub matches: Vec<KeywordMatch>,
    pub score: f64,
}
