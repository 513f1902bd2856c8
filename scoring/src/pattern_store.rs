use chrono::{DateTime, Duration, Utc};
use common::config::BehavioralConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ScoringError, ScoringResult};
use crate::model::{
    BEHAVIORAL_MAX, BehavioralPattern, DateRange, IdentityHash, ModelId, PatternEvidence,
    PatternStatistics,
};
use crate::storage::PatternStorage;

const AUTO_RESOLUTION_NOTE: &str = "auto-resolved: no repeat detection within the retention period";

/// Sole writer of behavioural patterns.
///
/// Lifecycle per identity and type: detected, repeat-detected (escalating),
/// resolved. A resolved pattern is never reopened; a later detection starts a
/// fresh instance.
pub struct PatternStore {
    storage: Arc<dyn PatternStorage>,
    escalation_step: f64,
    retention: Duration,
}

impl PatternStore {
    pub fn new(config: &BehavioralConfig, storage: Arc<dyn PatternStorage>) -> Self {
        Self {
            storage,
            escalation_step: config.escalation_step,
            retention: Duration::days(config.pattern_retention_days),
        }
    }

    /// Opens a new pattern or escalates the open one of the same type.
    pub async fn record_detection(
        &self,
        identity_hash: &IdentityHash,
        evidence: PatternEvidence,
        now: DateTime<Utc>,
    ) -> ScoringResult<BehavioralPattern> {
        if !evidence.risk_score.is_finite() || !(0.0..=BEHAVIORAL_MAX).contains(&evidence.risk_score) {
            return Err(ScoringError::validation(format!(
                "pattern risk score {} outside [0, {}]",
                evidence.risk_score, BEHAVIORAL_MAX
            )));
        }

        let open = self
            .storage
            .find_open_pattern(identity_hash, evidence.pattern_type)
            .await?
            .filter(|p| now - p.last_detected_at <= evidence.pattern_type.escalation_window());

        match open {
            Some(mut pattern) => {
                pattern.violation_count += 1;
                pattern.risk_score =
                    (pattern.risk_score.max(evidence.risk_score) + self.escalation_step).min(BEHAVIORAL_MAX);
                pattern.pattern_data = with_detection_times(
                    evidence.pattern_data,
                    detection_times(&pattern.pattern_data),
                    now,
                );
                for rule in evidence.detection_rules {
                    if !pattern.detection_rules.contains(&rule) {
                        pattern.detection_rules.push(rule);
                    }
                }
                pattern.last_detected_at = now;
                pattern.updated_at = now;
                self.storage.replace_pattern(&pattern).await?;
                info!(
                    identity = %identity_hash.short(),
                    pattern_type = %pattern.pattern_type,
                    violations = pattern.violation_count,
                    risk = pattern.risk_score,
                    "behavioral pattern escalated"
                );
                Ok(pattern)
            }
            None => {
                let pattern = BehavioralPattern {
                    id: 0,
                    identity_hash: identity_hash.clone(),
                    pattern_type: evidence.pattern_type,
                    risk_score: evidence.risk_score,
                    violation_count: 1,
                    pattern_data: with_detection_times(evidence.pattern_data, Vec::new(), now),
                    detection_rules: evidence.detection_rules,
                    is_resolved: false,
                    resolution_notes: None,
                    first_detected_at: now,
                    last_detected_at: now,
                    resolved_at: None,
                    created_at: now,
                    updated_at: now,
                };
                let pattern = self.storage.insert_pattern(pattern).await?;
                info!(
                    identity = %identity_hash.short(),
                    pattern_type = %pattern.pattern_type,
                    risk = pattern.risk_score,
                    "behavioral pattern detected"
                );
                Ok(pattern)
            }
        }
    }

    pub async fn get(&self, pattern_id: ModelId) -> ScoringResult<BehavioralPattern> {
        self.storage
            .get_pattern(pattern_id)
            .await?
            .ok_or_else(|| ScoringError::not_found("behavioral pattern", pattern_id))
    }

    /// Marks the pattern resolved; it stays stored for dispute review.
    pub async fn resolve(
        &self,
        pattern_id: ModelId,
        notes: &str,
        now: DateTime<Utc>,
    ) -> ScoringResult<BehavioralPattern> {
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(ScoringError::validation("resolving a pattern requires a note"));
        }
        let mut pattern = self.get(pattern_id).await?;
        if pattern.is_resolved {
            return Err(ScoringError::validation(format!(
                "behavioral pattern {} is already resolved",
                pattern_id
            )));
        }
        pattern.is_resolved = true;
        pattern.resolution_notes = Some(notes.to_string());
        pattern.resolved_at = Some(now);
        pattern.updated_at = now;
        self.storage.replace_pattern(&pattern).await?;
        info!(pattern_id, pattern_type = %pattern.pattern_type, "behavioral pattern resolved");
        Ok(pattern)
    }

    /// Unresolved patterns for the identity detected at or after `since`.
    pub async fn active_patterns(
        &self,
        identity_hash: &IdentityHash,
        since: DateTime<Utc>,
    ) -> ScoringResult<Vec<BehavioralPattern>> {
        let mut patterns: Vec<BehavioralPattern> = self
            .storage
            .patterns_for_identity(identity_hash, false)
            .await?
            .into_iter()
            .filter(|p| p.last_detected_at >= since)
            .collect();
        patterns.sort_by_key(|p| (p.pattern_type, p.id));
        Ok(patterns)
    }

    /// Unresolved patterns at or above `min_risk`, riskiest first, for triage.
    pub async fn critical_patterns(&self, min_risk: f64) -> ScoringResult<Vec<BehavioralPattern>> {
        let mut patterns: Vec<BehavioralPattern> = self
            .storage
            .unresolved_patterns()
            .await?
            .into_iter()
            .filter(|p| p.risk_score >= min_risk)
            .collect();
        patterns.sort_by(|a, b| {
            b.risk_score
                .total_cmp(&a.risk_score)
                .then_with(|| b.last_detected_at.cmp(&a.last_detected_at))
        });
        Ok(patterns)
    }

    pub async fn statistics(&self, range: DateRange) -> ScoringResult<PatternStatistics> {
        let patterns = self.storage.patterns_detected_in(range).await?;
        let mut stats = PatternStatistics {
            total: patterns.len(),
            ..Default::default()
        };
        let mut risk_sum = 0.0;
        for pattern in &patterns {
            if pattern.is_resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *stats.by_type.entry(pattern.pattern_type).or_default() += 1;
            stats.risk_bands.add(pattern.risk_score);
            stats.total_violations += pattern.violation_count as u64;
            risk_sum += pattern.risk_score;
        }
        if stats.total > 0 {
            stats.resolution_rate = stats.resolved as f64 / stats.total as f64;
            stats.average_risk_score = risk_sum / stats.total as f64;
        }
        Ok(stats)
    }

    /// Resolves open patterns whose last detection is older than the retention period.
    pub async fn auto_resolve_stale(&self, now: DateTime<Utc>) -> ScoringResult<usize> {
        let cutoff = now - self.retention;
        let stale: Vec<BehavioralPattern> = self
            .storage
            .unresolved_patterns()
            .await?
            .into_iter()
            .filter(|p| p.last_detected_at < cutoff)
            .collect();
        for mut pattern in stale.iter().cloned() {
            pattern.is_resolved = true;
            pattern.resolution_notes = Some(AUTO_RESOLUTION_NOTE.to_string());
            pattern.resolved_at = Some(now);
            pattern.updated_at = now;
            self.storage.replace_pattern(&pattern).await?;
        }
        debug!(count = stale.len(), "stale behavioral patterns auto-resolved");
        Ok(stale.len())
    }
}

fn detection_times(pattern_data: &Value) -> Vec<Value> {
    pattern_data
        .get("detection_times")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn with_detection_times(data: Value, mut times: Vec<Value>, now: DateTime<Utc>) -> Value {
    times.push(json!(now.to_rfc3339()));
    match data {
        Value::Object(mut map) => {
            map.insert("detection_times".to_string(), Value::Array(times));
            Value::Object(map)
        }
        other => json!({ "evidence": other, "detection_times": times }),
    }
}
