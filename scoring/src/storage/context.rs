use crate::error::ScoringResult;
use crate::model::{ContextAnalysis, IdentityHash};
use async_trait::async_trait;

#[async_trait]
pub trait ContextAnalysisStorage: Send + Sync {
    async fn insert_context_analysis(&self, analysis: ContextAnalysis) -> ScoringResult<ContextAnalysis>;

    async fn context_analyses_for_identity(
        &self,
        identity_hash: &IdentityHash,
    ) -> ScoringResult<Vec<ContextAnalysis>>;
}
