use crate::error::ScoringResult;
use crate::model::{CallRecord, IdentityHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait ActivityStorage: Send + Sync {
    async fn record_call(&self, call: CallRecord) -> ScoringResult<CallRecord>;

    /// Calls for the identity at or after `since`, oldest first.
    async fn calls_since(
        &self,
        identity_hash: &IdentityHash,
        since: DateTime<Utc>,
    ) -> ScoringResult<Vec<CallRecord>>;
}
