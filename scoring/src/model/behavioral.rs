use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display as EnumDisplay, EnumIter, EnumString};

use super::{IdentityHash, ModelId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatternType {
    FrequencyAbuse,
    TimeAnomaly,
    LocationImpossible,
    ContentSimilarity,
}

impl PatternType {
    /// How long after its last detection a pattern still escalates instead of
    /// a fresh instance being opened.
    pub fn escalation_window(&self) -> Duration {
        match self {
            PatternType::FrequencyAbuse => Duration::hours(24),
            PatternType::TimeAnomaly => Duration::days(7),
            PatternType::LocationImpossible => Duration::days(7),
            PatternType::ContentSimilarity => Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// One scored call, kept as activity history for behavioural analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: ModelId,
    pub identity_hash: IdentityHash,
    pub occurred_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub feedback_text: String,
}

/// What a single detector check found for the current call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvidence {
    pub pattern_type: PatternType,
    pub risk_score: f64,
    pub pattern_data: serde_json::Value,
    pub detection_rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralPattern {
    pub id: ModelId,
    pub identity_hash: IdentityHash,
    pub pattern_type: PatternType,
    pub risk_score: f64,
    pub violation_count: u32,
    pub pattern_data: serde_json::Value,
    pub detection_rules: Vec<String>,
    pub is_resolved: bool,
    pub resolution_notes: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    pub last_detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskBands {
    /// risk_score < 10
    pub low: usize,
    /// 10 <= risk_score < 20
    pub medium: usize,
    /// risk_score >= 20
    pub high: usize,
}

impl RiskBands {
    pub fn add(&mut self, risk_score: f64) {
        if risk_score >= 20.0 {
            self.high += 1;
        } else if risk_score >= 10.0 {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStatistics {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub resolution_rate: f64,
    pub average_risk_score: f64,
    pub total_violations: u64,
    pub by_type: BTreeMap<PatternType, usize>,
    pub risk_bands: RiskBands,
}
