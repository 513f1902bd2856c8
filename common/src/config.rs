use serde::Deserialize;
use std::{error::Error, fs};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommonConfig {
    pub project_name: String,
    /// Ruleset tag stamped on every FraudScore produced with this config.
    pub analysis_version: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            project_name: "feedback".to_string(),
            analysis_version: "v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub score_ttl_hours: i64,
    pub retention_days: i64,
    pub critical_pattern_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            score_ttl_hours: 24,
            retention_days: 90,
            critical_pattern_threshold: 20.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KeywordConfig {
    /// Share of nominal severity contributed by every hit after the strongest one.
    pub additional_hit_factor: f64,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            additional_hit_factor: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BehavioralConfig {
    pub frequency_window_minutes: i64,
    pub frequency_threshold: usize,
    pub history_days: i64,
    pub min_baseline_calls: usize,
    pub unusual_hour_share: f64,
    pub anomaly_cluster_size: usize,
    pub max_travel_speed_kmh: f64,
    pub similarity_threshold: f64,
    pub min_similar_calls: usize,
    pub escalation_step: f64,
    pub pattern_retention_days: i64,
}

impl Default for BehavioralConfig {
    fn default() -> Self {
        Self {
            frequency_window_minutes: 10,
            frequency_threshold: 5,
            history_days: 30,
            min_baseline_calls: 5,
            unusual_hour_share: 0.1,
            anomaly_cluster_size: 2,
            max_travel_speed_kmh: 900.0,
            similarity_threshold: 0.8,
            min_similar_calls: 1,
            escalation_step: 2.0,
            pattern_retention_days: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_in_flight: usize,
    pub degraded_score: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8089/v1/legitimacy".to_string(),
            timeout_ms: 5000,
            max_retries: 2,
            backoff_ms: 200,
            max_in_flight: 8,
            degraded_score: 10.0,
        }
    }
}

/// Retry settings for the transaction match provider.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransactionConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_retries: 1,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessorConfig {
    pub threads: u32,
    pub log_level: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub common: CommonConfig,
    pub scoring: ScoringConfig,
    pub keywords: KeywordConfig,
    pub behavioral: BehavioralConfig,
    pub context: ContextConfig,
    pub transaction: TransactionConfig,
    pub processor: ProcessorConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config = serde_yml::from_str(contents)?;

        Ok(config)
    }
}
