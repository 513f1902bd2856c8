use common::config::KeywordConfig;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ScoringError, ScoringResult};
use crate::model::{
    KEYWORD_MAX, KeywordCategory, KeywordDetection, KeywordMatch, MAX_SEVERITY, MIN_SEVERITY,
    ModelId, NewKeyword, RedFlagKeyword,
};
use crate::storage::KeywordStorage;

const ALL_LANGUAGES: &str = "*";
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

struct CompiledKeyword {
    keyword: RedFlagKeyword,
    needle: String,
    pattern: Option<Regex>,
}

impl CompiledKeyword {
    fn occurrences(&self, text: &str, lowered: &str) -> usize {
        let literal = if self.needle.is_empty() {
            0
        } else {
            lowered.matches(self.needle.as_str()).count()
        };
        let fuzzy = self
            .pattern
            .as_ref()
            .map_or(0, |p| p.find_iter(text).count());
        literal.max(fuzzy)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

/// Scores the strongest hit fully and every further distinct hit at
/// `additional_hit_factor` of its severity, capped at the component max.
pub fn score_severities(severities: &[u8], additional_hit_factor: f64) -> f64 {
    let mut sorted: Vec<f64> = severities.iter().map(|s| *s as f64).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let raw = sorted
        .iter()
        .enumerate()
        .map(|(i, s)| if i == 0 { *s } else { s * additional_hit_factor })
        .fold(0.0_f64, |total, s| total + s);
    raw.min(KEYWORD_MAX)
}

/// Compiled lexicons per language. `generation` moves on every curation
/// write; a load started under an older generation is never cached.
#[derive(Default)]
struct LexiconCache {
    generation: u64,
    by_language: HashMap<String, Arc<Vec<CompiledKeyword>>>,
}

/// Red-flag lexicon scanner plus the curation surface over the lexicon.
pub struct KeywordDetector {
    storage: Arc<dyn KeywordStorage>,
    additional_hit_factor: f64,
    lexicons: RwLock<LexiconCache>,
}

impl KeywordDetector {
    pub fn new(config: &KeywordConfig, storage: Arc<dyn KeywordStorage>) -> ScoringResult<Self> {
        if !(0.0..=1.0).contains(&config.additional_hit_factor) {
            return Err(ScoringError::Config(format!(
                "additional_hit_factor {} outside [0, 1]",
                config.additional_hit_factor
            )));
        }
        Ok(Self {
            storage,
            additional_hit_factor: config.additional_hit_factor,
            lexicons: RwLock::new(LexiconCache::default()),
        })
    }

    pub async fn detect(&self, text: &str, language: &str) -> ScoringResult<KeywordDetection> {
        let lexicon = self.lexicon(language).await?;
        let lowered = text.to_lowercase();

        let mut matches: Vec<KeywordMatch> = lexicon
            .iter()
            .filter_map(|entry| {
                let occurrences = entry.occurrences(text, &lowered);
                (occurrences > 0).then(|| KeywordMatch {
                    keyword_id: entry.keyword.id,
                    keyword: entry.keyword.keyword.clone(),
                    category: entry.keyword.category,
                    severity: entry.keyword.severity_level,
                    occurrences,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.keyword.cmp(&b.keyword)));

        let severities: Vec<u8> = matches.iter().map(|m| m.severity).collect();
        let score = score_severities(&severities, self.additional_hit_factor);
        debug!(language, matches = matches.len(), score, "keyword scan finished");

        Ok(KeywordDetection { matches, score })
    }

    async fn lexicon(&self, language: &str) -> ScoringResult<Arc<Vec<CompiledKeyword>>> {
        let key = match language.trim().to_lowercase() {
            lang if lang.is_empty() => ALL_LANGUAGES.to_string(),
            lang => lang,
        };
        let generation = {
            let cache = self.lexicons.read().await;
            if let Some(cached) = cache.by_language.get(&key) {
                return Ok(cached.clone());
            }
            cache.generation
        };

        let filter = (key != ALL_LANGUAGES).then_some(key.as_str());
        let keywords = self.storage.active_keywords(filter).await?;
        let compiled: Vec<CompiledKeyword> = keywords
            .into_iter()
            .map(|keyword| {
                let pattern = keyword.detection_pattern.as_deref().and_then(|p| {
                    compile_pattern(p)
                        .map_err(|e| warn!(keyword = %keyword.keyword, error = %e, "skipping invalid detection pattern"))
                        .ok()
                });
                CompiledKeyword {
                    needle: keyword.keyword.trim().to_lowercase(),
                    keyword,
                    pattern,
                }
            })
            .collect();

        let compiled = Arc::new(compiled);
        let mut cache = self.lexicons.write().await;
        if cache.generation == generation {
            cache.by_language.insert(key, compiled.clone());
        } else {
            debug!(language = %key, "lexicon changed during load, not caching");
        }
        Ok(compiled)
    }

    /// Drops every compiled lexicon; the next scan reloads from storage.
    pub async fn invalidate(&self) {
        let mut cache = self.lexicons.write().await;
        cache.generation += 1;
        cache.by_language.clear();
    }

    pub async fn bulk_create(&self, keywords: Vec<NewKeyword>) -> ScoringResult<Vec<RedFlagKeyword>> {
        for keyword in &keywords {
            validate_new_keyword(keyword)?;
        }
        let created = self.storage.insert_keywords(keywords).await?;
        self.invalidate().await;
        info!(count = created.len(), "added red-flag keywords");
        Ok(created)
    }

    pub async fn by_category(&self, category: KeywordCategory) -> ScoringResult<Vec<RedFlagKeyword>> {
        self.storage.keywords_by_category(category).await
    }

    pub async fn by_language(&self, language_code: &str) -> ScoringResult<Vec<RedFlagKeyword>> {
        self.storage.keywords_by_language(&language_code.trim().to_lowercase()).await
    }

    /// Deactivation is the only removal; historical matches keep their keyword.
    pub async fn set_active(&self, keyword_id: ModelId, is_active: bool) -> ScoringResult<RedFlagKeyword> {
        let keyword = self.storage.set_keyword_active(keyword_id, is_active).await?;
        self.invalidate().await;
        info!(keyword_id, is_active, "keyword activation changed");
        Ok(keyword)
    }
}

fn validate_new_keyword(keyword: &NewKeyword) -> ScoringResult<()> {
    if keyword.keyword.trim().is_empty() {
        return Err(ScoringError::validation("keyword must not be empty"));
    }
    if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&keyword.severity_level) {
        return Err(ScoringError::validation(format!(
            "severity {} for '{}' outside [{}, {}]",
            keyword.severity_level, keyword.keyword, MIN_SEVERITY, MAX_SEVERITY
        )));
    }
    if keyword.language_code.trim().is_empty() {
        return Err(ScoringError::validation(format!(
            "keyword '{}' needs a language code",
            keyword.keyword
        )));
    }
    if keyword.language_code != keyword.language_code.trim().to_lowercase() {
        return Err(ScoringError::validation(format!(
            "language code '{}' must be lowercase",
            keyword.language_code
        )));
    }
    if let Some(pattern) = &keyword.detection_pattern {
        compile_pattern(pattern).map_err(|e| {
            ScoringError::validation(format!("invalid detection pattern for '{}': {}", keyword.keyword, e))
        })?;
    }
    Ok(())
}
