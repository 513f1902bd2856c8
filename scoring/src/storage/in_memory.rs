use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::{ScoringError, ScoringResult};
use crate::model::*;
use crate::storage::{
    ActivityStorage, ContextAnalysisStorage, FraudScoreStorage, KeywordStorage, PatternStorage,
};

/// Append-only arena per record family plus an identity index.
struct Table<T> {
    rows: BTreeMap<ModelId, T>,
    by_identity: HashMap<IdentityHash, Vec<ModelId>>,
    next_id: ModelId,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_identity: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<T> Table<T> {
    fn allocate(&mut self) -> ModelId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, id: ModelId, identity: Option<&IdentityHash>, row: T) {
        if let Some(identity) = identity {
            self.by_identity.entry(identity.clone()).or_default().push(id);
        }
        self.rows.insert(id, row);
    }

    fn for_identity<'a>(&'a self, identity: &IdentityHash) -> impl Iterator<Item = &'a T> + 'a {
        self.by_identity
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }
}

#[derive(Default)]
struct Tables {
    fraud_scores: Table<FraudScore>,
    patterns: Table<BehavioralPattern>,
    keywords: Table<RedFlagKeyword>,
    context_analyses: Table<ContextAnalysis>,
    calls: Table<CallRecord>,
}

/// Reference backend implementing every storage seam.
///
/// Each write happens under one write guard, so a row is either fully stored
/// or not stored at all.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(entity: &'static str, id: ModelId) -> ScoringError {
    ScoringError::Persistence(format!("{} {} does not exist", entity, id))
}

#[async_trait]
impl FraudScoreStorage for InMemoryStorage {
    async fn insert_fraud_score(&self, mut score: FraudScore) -> ScoringResult<FraudScore> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.fraud_scores;
        score.id = table.allocate();
        table.push(score.id, Some(&score.identity_hash.clone()), score.clone());
        Ok(score)
    }

    async fn replace_fraud_score(&self, score: &FraudScore) -> ScoringResult<()> {
        let mut tables = self.tables.write().await;
        match tables.fraud_scores.rows.get_mut(&score.id) {
            Some(row) if row.identity_hash == score.identity_hash => {
                *row = score.clone();
                Ok(())
            }
            Some(_) => Err(ScoringError::Persistence(format!(
                "fraud score {} belongs to another identity",
                score.id
            ))),
            None => Err(missing("fraud score", score.id)),
        }
    }

    async fn get_fraud_score(&self, id: ModelId) -> ScoringResult<Option<FraudScore>> {
        Ok(self.tables.read().await.fraud_scores.rows.get(&id).cloned())
    }

    async fn latest_active_fraud_score(
        &self,
        identity_hash: &IdentityHash,
        now: DateTime<Utc>,
    ) -> ScoringResult<Option<FraudScore>> {
        let tables = self.tables.read().await;
        Ok(tables
            .fraud_scores
            .for_identity(identity_hash)
            .filter(|s| !s.is_expired(now))
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn fraud_score_history(&self, identity_hash: &IdentityHash) -> ScoringResult<Vec<FraudScore>> {
        let tables = self.tables.read().await;
        let mut history: Vec<FraudScore> = tables
            .fraud_scores
            .for_identity(identity_hash)
            .cloned()
            .collect();
        history.sort_by_key(|s| (s.created_at, s.id));
        Ok(history)
    }

    async fn latest_fraud_scores(
        &self,
        identity_hashes: &[IdentityHash],
    ) -> ScoringResult<HashMap<IdentityHash, FraudScore>> {
        let tables = self.tables.read().await;
        Ok(identity_hashes
            .iter()
            .filter_map(|identity| {
                tables
                    .fraud_scores
                    .for_identity(identity)
                    .max_by_key(|s| (s.created_at, s.id))
                    .map(|s| (identity.clone(), s.clone()))
            })
            .collect())
    }

    async fn fraud_scores_created_in(&self, range: DateRange) -> ScoringResult<Vec<FraudScore>> {
        let tables = self.tables.read().await;
        Ok(tables
            .fraud_scores
            .rows
            .values()
            .filter(|s| range.contains(s.created_at))
            .cloned()
            .collect())
    }

    async fn delete_fraud_scores_expired_before(&self, cutoff: DateTime<Utc>) -> ScoringResult<usize> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.fraud_scores;
        let doomed: Vec<(ModelId, IdentityHash)> = table
            .rows
            .values()
            .filter(|s| s.expires_at.is_some_and(|at| at < cutoff))
            .map(|s| (s.id, s.identity_hash.clone()))
            .collect();
        for (id, identity) in &doomed {
            table.rows.remove(id);
            if let Some(ids) = table.by_identity.get_mut(identity) {
                ids.retain(|i| i != id);
                if ids.is_empty() {
                    table.by_identity.remove(identity);
                }
            }
        }
        Ok(doomed.len())
    }
}

#[async_trait]
impl PatternStorage for InMemoryStorage {
    async fn insert_pattern(&self, mut pattern: BehavioralPattern) -> ScoringResult<BehavioralPattern> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.patterns;
        pattern.id = table.allocate();
        table.push(pattern.id, Some(&pattern.identity_hash.clone()), pattern.clone());
        Ok(pattern)
    }

    async fn replace_pattern(&self, pattern: &BehavioralPattern) -> ScoringResult<()> {
        let mut tables = self.tables.write().await;
        match tables.patterns.rows.get_mut(&pattern.id) {
            Some(row) => {
                *row = pattern.clone();
                Ok(())
            }
            None => Err(missing("behavioral pattern", pattern.id)),
        }
    }

    async fn get_pattern(&self, id: ModelId) -> ScoringResult<Option<BehavioralPattern>> {
        Ok(self.tables.read().await.patterns.rows.get(&id).cloned())
    }

    async fn find_open_pattern(
        &self,
        identity_hash: &IdentityHash,
        pattern_type: PatternType,
    ) -> ScoringResult<Option<BehavioralPattern>> {
        let tables = self.tables.read().await;
        Ok(tables
            .patterns
            .for_identity(identity_hash)
            .filter(|p| p.pattern_type == pattern_type && !p.is_resolved)
            .max_by_key(|p| (p.last_detected_at, p.id))
            .cloned())
    }

    async fn patterns_for_identity(
        &self,
        identity_hash: &IdentityHash,
        include_resolved: bool,
    ) -> ScoringResult<Vec<BehavioralPattern>> {
        let tables = self.tables.read().await;
        Ok(tables
            .patterns
            .for_identity(identity_hash)
            .filter(|p| include_resolved || !p.is_resolved)
            .cloned()
            .collect())
    }

    async fn unresolved_patterns(&self) -> ScoringResult<Vec<BehavioralPattern>> {
        let tables = self.tables.read().await;
        Ok(tables
            .patterns
            .rows
            .values()
            .filter(|p| !p.is_resolved)
            .cloned()
            .collect())
    }

    async fn patterns_detected_in(&self, range: DateRange) -> ScoringResult<Vec<BehavioralPattern>> {
        let tables = self.tables.read().await;
        Ok(tables
            .patterns
            .rows
            .values()
            .filter(|p| range.contains(p.first_detected_at))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl KeywordStorage for InMemoryStorage {
    async fn insert_keywords(&self, keywords: Vec<NewKeyword>) -> ScoringResult<Vec<RedFlagKeyword>> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.keywords;

        // Check the whole batch before touching the table.
        let mut seen: Vec<(String, String)> = table
            .rows
            .values()
            .map(|k| (k.keyword.to_lowercase(), k.language_code.clone()))
            .collect();
        for new in &keywords {
            let key = (new.keyword.to_lowercase(), new.language_code.clone());
            if seen.contains(&key) {
                return Err(ScoringError::validation(format!(
                    "keyword '{}' already exists for language '{}'",
                    new.keyword, new.language_code
                )));
            }
            seen.push(key);
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(keywords.len());
        for new in keywords {
            let id = table.allocate();
            let keyword = RedFlagKeyword {
                id,
                keyword: new.keyword,
                category: new.category,
                severity_level: new.severity_level,
                language_code: new.language_code,
                detection_pattern: new.detection_pattern,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            table.push(id, None, keyword.clone());
            created.push(keyword);
        }
        Ok(created)
    }

    async fn active_keywords(&self, language_code: Option<&str>) -> ScoringResult<Vec<RedFlagKeyword>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keywords
            .rows
            .values()
            .filter(|k| k.is_active)
            .filter(|k| language_code.map_or(true, |lang| k.language_code == lang))
            .cloned()
            .collect())
    }

    async fn keywords_by_category(&self, category: KeywordCategory) -> ScoringResult<Vec<RedFlagKeyword>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keywords
            .rows
            .values()
            .filter(|k| k.category == category)
            .cloned()
            .collect())
    }

    async fn keywords_by_language(&self, language_code: &str) -> ScoringResult<Vec<RedFlagKeyword>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keywords
            .rows
            .values()
            .filter(|k| k.language_code == language_code)
            .cloned()
            .collect())
    }

    async fn set_keyword_active(&self, id: ModelId, is_active: bool) -> ScoringResult<RedFlagKeyword> {
        let mut tables = self.tables.write().await;
        let keyword = tables
            .keywords
            .rows
            .get_mut(&id)
            .ok_or_else(|| ScoringError::not_found("keyword", id))?;
        keyword.is_active = is_active;
        keyword.updated_at = Utc::now();
        Ok(keyword.clone())
    }
}

#[async_trait]
impl ContextAnalysisStorage for InMemoryStorage {
    async fn insert_context_analysis(&self, mut analysis: ContextAnalysis) -> ScoringResult<ContextAnalysis> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.context_analyses;
        analysis.id = table.allocate();
        table.push(analysis.id, Some(&analysis.identity_hash.clone()), analysis.clone());
        Ok(analysis)
    }

    async fn context_analyses_for_identity(
        &self,
        identity_hash: &IdentityHash,
    ) -> ScoringResult<Vec<ContextAnalysis>> {
        let tables = self.tables.read().await;
        Ok(tables.context_analyses.for_identity(identity_hash).cloned().collect())
    }
}

#[async_trait]
impl ActivityStorage for InMemoryStorage {
    async fn record_call(&self, mut call: CallRecord) -> ScoringResult<CallRecord> {
        let mut tables = self.tables.write().await;
        let table = &mut tables.calls;
        call.id = table.allocate();
        table.push(call.id, Some(&call.identity_hash.clone()), call.clone());
        Ok(call)
    }

    async fn calls_since(
        &self,
        identity_hash: &IdentityHash,
        since: DateTime<Utc>,
    ) -> ScoringResult<Vec<CallRecord>> {
        let tables = self.tables.read().await;
        let mut calls: Vec<CallRecord> = tables
            .calls
            .for_identity(identity_hash)
            .filter(|c| c.occurred_at >= since)
            .cloned()
            .collect();
        calls.sort_by_key(|c| (c.occurred_at, c.id));
        Ok(calls)
    }
}
