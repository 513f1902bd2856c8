use crate::error::ScoringResult;
use crate::model::{BehavioralPattern, DateRange, IdentityHash, ModelId, PatternType};
use async_trait::async_trait;

#[async_trait]
pub trait PatternStorage: Send + Sync {
    async fn insert_pattern(&self, pattern: BehavioralPattern) -> ScoringResult<BehavioralPattern>;

    async fn replace_pattern(&self, pattern: &BehavioralPattern) -> ScoringResult<()>;

    async fn get_pattern(&self, id: ModelId) -> ScoringResult<Option<BehavioralPattern>>;

    /// Latest unresolved pattern of the given type for the identity.
    async fn find_open_pattern(
        &self,
        identity_hash: &IdentityHash,
        pattern_type: PatternType,
    ) -> ScoringResult<Option<BehavioralPattern>>;

    async fn patterns_for_identity(
        &self,
        identity_hash: &IdentityHash,
        include_resolved: bool,
    ) -> ScoringResult<Vec<BehavioralPattern>>;

    async fn unresolved_patterns(&self) -> ScoringResult<Vec<BehavioralPattern>>;

    /// Patterns first detected inside the range, resolved ones included.
    async fn patterns_detected_in(&self, range: DateRange) -> ScoringResult<Vec<BehavioralPattern>>;
}
