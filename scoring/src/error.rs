use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoringError {
    /// Rejected input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream '{provider}' unavailable: {reason}")]
    UpstreamUnavailable { provider: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScoringError {
    pub fn validation(message: impl Into<String>) -> Self {
        ScoringError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ScoringError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type ScoringResult<T> = Result<T, ScoringError>;

/// Failure reported by an external collaborator (legitimacy or transaction provider).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Transient(_))
    }
}
