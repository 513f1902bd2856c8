use chrono::{DateTime, Duration, Timelike, Utc};
use common::config::BehavioralConfig;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::ScoringResult;
use crate::model::{
    BEHAVIORAL_MAX, BehavioralPattern, CallRecord, GeoPoint, IdentityHash, PatternEvidence,
    PatternType,
};
use crate::pattern_store::PatternStore;
use crate::storage::ActivityStorage;

const SHINGLE_SIZE: usize = 3;
/// Moves shorter than this are treated as location noise.
const MIN_TRAVEL_KM: f64 = 1.0;

/// The call being scored, before it is stored as history.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub identity_hash: IdentityHash,
    pub occurred_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub feedback_text: String,
}

impl IncomingCall {
    fn is_replay_of(&self, record: &CallRecord) -> bool {
        record.identity_hash == self.identity_hash
            && record.occurred_at == self.occurred_at
            && record.location == self.location
            && record.feedback_text == self.feedback_text
    }
}

#[derive(Debug, Clone, Default)]
pub struct BehavioralOutcome {
    pub score: f64,
    /// Patterns opened or escalated by this call.
    pub detections: Vec<BehavioralPattern>,
    /// Every unresolved pattern feeding the score.
    pub active_patterns: Vec<BehavioralPattern>,
}

pub struct BehavioralPatternDetector {
    activity: Arc<dyn ActivityStorage>,
    patterns: Arc<PatternStore>,
    config: BehavioralConfig,
}

impl BehavioralPatternDetector {
    pub fn new(
        config: &BehavioralConfig,
        activity: Arc<dyn ActivityStorage>,
        patterns: Arc<PatternStore>,
    ) -> Self {
        Self {
            activity,
            patterns,
            config: config.clone(),
        }
    }

    /// Runs every check against the caller's history, records the call and
    /// returns the capped sum of the active pattern risks.
    ///
    /// A call already in the history (same time, place and text) is a replay:
    /// it is scored against the calls before it without being stored again or
    /// reinforcing patterns, so re-scoring a submission is idempotent.
    ///
    /// Read-modify-write on patterns: callers must serialize per identity.
    pub async fn analyze(&self, call: IncomingCall, now: DateTime<Utc>) -> ScoringResult<BehavioralOutcome> {
        let history_start = call.occurred_at - Duration::days(self.config.history_days);
        let mut prior: Vec<CallRecord> = self
            .activity
            .calls_since(&call.identity_hash, history_start)
            .await?
            .into_iter()
            .filter(|c| c.occurred_at <= call.occurred_at)
            .collect();

        let replayed = prior.iter().position(|c| call.is_replay_of(c));
        let current = match replayed {
            Some(index) => prior.remove(index),
            None => CallRecord {
                id: 0,
                identity_hash: call.identity_hash,
                occurred_at: call.occurred_at,
                location: call.location,
                feedback_text: call.feedback_text,
            },
        };

        let mut detections = Vec::new();
        if replayed.is_none() {
            let evidence: Vec<PatternEvidence> = [
                detect_frequency_abuse(&prior, &current, &self.config),
                detect_time_anomaly(&prior, &current, &self.config),
                detect_impossible_travel(&prior, &current, &self.config),
                detect_content_similarity(&prior, &current, &self.config),
            ]
            .into_iter()
            .flatten()
            .collect();

            for item in evidence {
                detections.push(self.patterns.record_detection(&current.identity_hash, item, now).await?);
            }
            // Only once every pattern write has succeeded.
            self.activity.record_call(current.clone()).await?;
        } else {
            debug!(identity = %current.identity_hash.short(), call = current.id, "replayed call, history unchanged");
        }

        let active_patterns = self
            .patterns
            .active_patterns(&current.identity_hash, now - Duration::days(self.config.history_days))
            .await?;
        let score = active_patterns
            .iter()
            .fold(0.0_f64, |total, p| total + p.risk_score)
            .min(BEHAVIORAL_MAX);

        debug!(
            identity = %current.identity_hash.short(),
            history = prior.len(),
            detections = detections.len(),
            score,
            "behavioral analysis finished"
        );

        Ok(BehavioralOutcome {
            score,
            detections,
            active_patterns,
        })
    }
}

/// More than `frequency_threshold` calls inside the rolling window.
pub fn detect_frequency_abuse(
    prior: &[CallRecord],
    current: &CallRecord,
    config: &BehavioralConfig,
) -> Option<PatternEvidence> {
    let window_start = current.occurred_at - Duration::minutes(config.frequency_window_minutes);
    let mut timestamps: Vec<DateTime<Utc>> = prior
        .iter()
        .filter(|c| c.occurred_at >= window_start)
        .map(|c| c.occurred_at)
        .collect();
    timestamps.push(current.occurred_at);

    let count = timestamps.len();
    if count <= config.frequency_threshold {
        return None;
    }

    let excess = (count - config.frequency_threshold) as f64;
    let mut rules = vec!["frequency.window_exceeded".to_string()];
    if count >= config.frequency_threshold * 2 {
        rules.push("frequency.burst".to_string());
    }

    Some(PatternEvidence {
        pattern_type: PatternType::FrequencyAbuse,
        risk_score: (10.0 + 5.0 * (excess - 1.0)).min(BEHAVIORAL_MAX),
        pattern_data: json!({
            "call_count": count,
            "threshold": config.frequency_threshold,
            "window_minutes": config.frequency_window_minutes,
            "call_times": timestamps.iter().map(|t| t.to_rfc3339()).collect::<Vec<_>>(),
        }),
        detection_rules: rules,
    })
}

fn hour_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b);
    d.min(24 - d)
}

/// Recent calls clustered at hours the caller rarely used before.
///
/// Baseline is the history older than 24 hours; a call is anomalous when the
/// baseline share of its hour (plus or minus one) is below `unusual_hour_share`.
pub fn detect_time_anomaly(
    prior: &[CallRecord],
    current: &CallRecord,
    config: &BehavioralConfig,
) -> Option<PatternEvidence> {
    let recent_start = current.occurred_at - Duration::hours(24);
    let baseline: Vec<u32> = prior
        .iter()
        .filter(|c| c.occurred_at < recent_start)
        .map(|c| c.occurred_at.hour())
        .collect();
    if baseline.len() < config.min_baseline_calls {
        return None;
    }

    let share = |hour: u32| {
        baseline.iter().filter(|h| hour_distance(**h, hour) <= 1).count() as f64 / baseline.len() as f64
    };

    let current_share = share(current.occurred_at.hour());
    if current_share >= config.unusual_hour_share {
        return None;
    }

    let anomalous_hours: Vec<u32> = prior
        .iter()
        .filter(|c| c.occurred_at >= recent_start)
        .map(|c| c.occurred_at.hour())
        .chain(std::iter::once(current.occurred_at.hour()))
        .filter(|h| share(*h) < config.unusual_hour_share)
        .collect();
    if anomalous_hours.len() < config.anomaly_cluster_size {
        return None;
    }

    let extra = (anomalous_hours.len() - config.anomaly_cluster_size) as f64;
    Some(PatternEvidence {
        pattern_type: PatternType::TimeAnomaly,
        risk_score: (8.0 + 4.0 * extra).min(BEHAVIORAL_MAX),
        pattern_data: json!({
            "baseline_calls": baseline.len(),
            "current_hour": current.occurred_at.hour(),
            "current_hour_share": current_share,
            "anomalous_hours": anomalous_hours,
            "unusual_hour_share": config.unusual_hour_share,
        }),
        detection_rules: vec!["time.unusual_hour_cluster".to_string()],
    })
}

/// The move from the previous located call implies an implausible speed.
pub fn detect_impossible_travel(
    prior: &[CallRecord],
    current: &CallRecord,
    config: &BehavioralConfig,
) -> Option<PatternEvidence> {
    let to = current.location?;
    let previous = prior.iter().rev().find(|c| c.location.is_some() && c.id != current.id)?;
    let from = previous.location?;

    let distance_km = from.distance_km(&to);
    if distance_km < MIN_TRAVEL_KM {
        return None;
    }

    let elapsed_seconds = (current.occurred_at - previous.occurred_at).num_seconds();
    let (speed_kmh, risk_score, rule) = if elapsed_seconds <= 0 {
        (f64::INFINITY, BEHAVIORAL_MAX, "location.simultaneous_calls")
    } else {
        let speed = distance_km / (elapsed_seconds as f64 / 3600.0);
        if speed <= config.max_travel_speed_kmh {
            return None;
        }
        let ratio = speed / config.max_travel_speed_kmh;
        (speed, (15.0 + 10.0 * (ratio - 1.0)).min(BEHAVIORAL_MAX), "location.speed_exceeded")
    };

    let speed_value = if speed_kmh.is_finite() {
        json!((speed_kmh * 10.0).round() / 10.0)
    } else {
        Value::Null
    };
    Some(PatternEvidence {
        pattern_type: PatternType::LocationImpossible,
        risk_score,
        pattern_data: json!({
            "from": from,
            "to": to,
            "distance_km": (distance_km * 10.0).round() / 10.0,
            "elapsed_minutes": elapsed_seconds as f64 / 60.0,
            "speed_kmh": speed_value,
            "max_speed_kmh": config.max_travel_speed_kmh,
        }),
        detection_rules: vec![rule.to_string()],
    })
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn shingles(normalized: &str) -> HashSet<Vec<char>> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < SHINGLE_SIZE {
        return std::iter::once(chars).collect();
    }
    chars.windows(SHINGLE_SIZE).map(|w| w.to_vec()).collect()
}

/// Jaccard similarity over character trigrams of the normalised texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let (sa, sb) = (shingles(&a), shingles(&b));
    let intersection = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Near-duplicate feedback across calls, the signature of scripted submissions.
pub fn detect_content_similarity(
    prior: &[CallRecord],
    current: &CallRecord,
    config: &BehavioralConfig,
) -> Option<PatternEvidence> {
    let similarities: Vec<f64> = prior
        .iter()
        .filter(|c| c.id != current.id)
        .map(|c| text_similarity(&c.feedback_text, &current.feedback_text))
        .filter(|s| *s >= config.similarity_threshold)
        .collect();
    if similarities.is_empty() || similarities.len() < config.min_similar_calls {
        return None;
    }

    let max_similarity = similarities.iter().cloned().fold(0.0, f64::max);
    let extra = (similarities.len() - config.min_similar_calls.max(1)) as f64;
    Some(PatternEvidence {
        pattern_type: PatternType::ContentSimilarity,
        risk_score: (10.0 + 5.0 * extra).min(BEHAVIORAL_MAX),
        pattern_data: json!({
            "similar_calls": similarities.len(),
            "max_similarity": (max_similarity * 1000.0).round() / 1000.0,
            "threshold": config.similarity_threshold,
        }),
        detection_rules: vec!["content.near_duplicate".to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> IdentityHash {
        IdentityHash::parse(&"1f".repeat(32)).unwrap()
    }

    fn call(id: i64, at: DateTime<Utc>, text: &str, location: Option<GeoPoint>) -> CallRecord {
        CallRecord {
            id,
            identity_hash: identity(),
            occurred_at: at,
            location,
            feedback_text: text.to_string(),
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn six_calls_in_ten_minutes_exceed_threshold_of_five() {
        let config = BehavioralConfig::default();
        let prior: Vec<CallRecord> = (0..5).map(|i| call(i, at(2, 10, i as u32 * 2), "hi", None)).collect();
        let current = call(10, at(2, 10, 9), "hi", None);

        let evidence = detect_frequency_abuse(&prior, &current, &config).unwrap();

        assert_eq!(evidence.pattern_type, PatternType::FrequencyAbuse);
        assert_eq!(evidence.pattern_data["call_count"], 6);
        assert!(evidence.risk_score > 0.0);
    }

    #[test]
    fn calls_outside_the_window_do_not_count() {
        let config = BehavioralConfig::default();
        let prior: Vec<CallRecord> = (0..5).map(|i| call(i, at(2, 8, i as u32), "hi", None)).collect();
        let current = call(10, at(2, 10, 0), "hi", None);

        assert!(detect_frequency_abuse(&prior, &current, &config).is_none());
    }

    #[test]
    fn night_calls_against_a_daytime_baseline_are_anomalous() {
        let config = BehavioralConfig::default();
        let mut prior: Vec<CallRecord> = (1..=6).map(|d| call(d as i64, at(d, 14, 0), "ok", None)).collect();
        prior.push(call(20, at(10, 3, 0), "ok", None));
        let current = call(21, at(10, 4, 0), "ok", None);

        let evidence = detect_time_anomaly(&prior, &current, &config).unwrap();
        assert_eq!(evidence.pattern_type, PatternType::TimeAnomaly);
    }

    #[test]
    fn time_anomaly_needs_a_baseline() {
        let config = BehavioralConfig::default();
        let prior = vec![call(1, at(1, 14, 0), "ok", None)];
        assert!(detect_time_anomaly(&prior, &call(2, at(5, 3, 0), "ok", None), &config).is_none());
    }

    #[test]
    fn hanoi_to_ho_chi_minh_city_in_ten_minutes_is_impossible() {
        let config = BehavioralConfig::default();
        let hanoi = GeoPoint::new(21.0285, 105.8542);
        let saigon = GeoPoint::new(10.8231, 106.6297);
        let prior = vec![call(1, at(3, 9, 0), "a", Some(hanoi))];

        let evidence =
            detect_impossible_travel(&prior, &call(2, at(3, 9, 10), "b", Some(saigon)), &config).unwrap();
        assert_eq!(evidence.pattern_type, PatternType::LocationImpossible);
        assert!(evidence.pattern_data["distance_km"].as_f64().unwrap() > 1000.0);

        // a day later the same trip is plausible
        assert!(detect_impossible_travel(&prior, &call(3, at(4, 9, 0), "b", Some(saigon)), &config).is_none());
    }

    #[test]
    fn similarity_of_near_duplicates() {
        let a = "The pho was amazing and the staff were so friendly!";
        let b = "the pho was amazing, and the staff were so friendly";
        assert_eq!(text_similarity(a, b), 1.0);
        assert!(text_similarity(a, "Parking was impossible to find near the store") < 0.3);
        assert_eq!(text_similarity("", a), 0.0);
    }

    #[test]
    fn repeated_feedback_is_flagged() {
        let config = BehavioralConfig::default();
        let text = "Great service, fast delivery, will buy again";
        let prior = vec![call(1, at(1, 9, 0), text, None)];

        let evidence = detect_content_similarity(&prior, &call(2, at(2, 9, 0), text, None), &config).unwrap();
        assert_eq!(evidence.pattern_type, PatternType::ContentSimilarity);
        assert_eq!(evidence.risk_score, 10.0);
    }
}
