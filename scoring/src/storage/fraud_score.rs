use crate::error::ScoringResult;
use crate::model::{DateRange, FraudScore, IdentityHash, ModelId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[async_trait]
pub trait FraudScoreStorage: Send + Sync {
    /// Appends a new row and returns it with its assigned id.
    async fn insert_fraud_score(&self, score: FraudScore) -> ScoringResult<FraudScore>;

    /// Replaces a stored row wholesale (in-place correction path).
    async fn replace_fraud_score(&self, score: &FraudScore) -> ScoringResult<()>;

    async fn get_fraud_score(&self, id: ModelId) -> ScoringResult<Option<FraudScore>>;

    /// Most recently created row for the identity that is not expired at `now`.
    async fn latest_active_fraud_score(
        &self,
        identity_hash: &IdentityHash,
        now: DateTime<Utc>,
    ) -> ScoringResult<Option<FraudScore>>;

    /// Every row for the identity, oldest first.
    async fn fraud_score_history(&self, identity_hash: &IdentityHash) -> ScoringResult<Vec<FraudScore>>;

    /// Most recently created row per identity, regardless of expiry.
    async fn latest_fraud_scores(
        &self,
        identity_hashes: &[IdentityHash],
    ) -> ScoringResult<HashMap<IdentityHash, FraudScore>>;

    async fn fraud_scores_created_in(&self, range: DateRange) -> ScoringResult<Vec<FraudScore>>;

    /// Deletes rows whose `expires_at` is before `cutoff`; returns how many.
    async fn delete_fraud_scores_expired_before(&self, cutoff: DateTime<Utc>) -> ScoringResult<usize>;
}
