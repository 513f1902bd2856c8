use crate::error::ScoringResult;
use crate::model::{KeywordCategory, ModelId, NewKeyword, RedFlagKeyword};
use async_trait::async_trait;

#[async_trait]
pub trait KeywordStorage: Send + Sync {
    /// All-or-nothing bulk insert.
    async fn insert_keywords(&self, keywords: Vec<NewKeyword>) -> ScoringResult<Vec<RedFlagKeyword>>;

    /// Active keywords; `None` means every language.
    async fn active_keywords(&self, language_code: Option<&str>) -> ScoringResult<Vec<RedFlagKeyword>>;

    async fn keywords_by_category(&self, category: KeywordCategory) -> ScoringResult<Vec<RedFlagKeyword>>;

    async fn keywords_by_language(&self, language_code: &str) -> ScoringResult<Vec<RedFlagKeyword>>;

    async fn set_keyword_active(&self, id: ModelId, is_active: bool) -> ScoringResult<RedFlagKeyword>;
}
