use scoring::error::ScoringResult;
use scoring::model::MatchOutcome;
use scoring::processor::ScoreRequest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::matching::PrecomputedMatchProvider;

/// One line of a re-scoring batch: the submission plus its precomputed
/// transaction verification, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(flatten)]
    pub request: ScoreRequest,
    #[serde(default)]
    pub transaction_outcome: Option<MatchOutcome>,
}

pub fn parse_batch(json: &str) -> ScoringResult<Vec<BatchItem>> {
    Ok(serde_json::from_str(json)?)
}

pub fn read_batch(path: &Path) -> Result<Vec<BatchItem>, Box<dyn std::error::Error + Send + Sync>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read batch {}: {}", path.display(), e))?;
    Ok(parse_batch(&contents)?)
}

/// Splits a batch into the requests to score and the match outcomes to serve.
pub fn into_requests(items: Vec<BatchItem>) -> (Vec<ScoreRequest>, PrecomputedMatchProvider) {
    let mut matcher = PrecomputedMatchProvider::default();
    let requests = items
        .into_iter()
        .map(|item| {
            match (item.transaction_outcome, &item.request.claimed_transaction) {
                (Some(outcome), Some(claim)) => matcher.insert(&item.request.identity_hash, claim, outcome),
                (Some(outcome), None) => warn!(
                    identity = %item.request.identity_hash.short(),
                    %outcome,
                    "transaction outcome without a claimed purchase ignored"
                ),
                (None, _) => {}
            }
            item.request
        })
        .collect();
    (requests, matcher)
}
