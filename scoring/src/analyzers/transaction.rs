use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analyzers::retry::{RetryPolicy, call_with_retry};
use crate::error::ProviderError;
use crate::model::{ClaimedTransaction, IdentityHash, MatchOutcome};

const PROVIDER_NAME: &str = "transaction_match";

/// Matches a claimed purchase against store transaction records.
#[async_trait]
pub trait TransactionMatchProvider: Send + Sync {
    async fn match_transaction(
        &self,
        identity_hash: &IdentityHash,
        claim: &ClaimedTransaction,
    ) -> Result<MatchOutcome, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub outcome: MatchOutcome,
    pub score: f64,
    /// True when the provider failed and `Unavailable` was substituted.
    pub degraded: bool,
}

pub struct TransactionVerifier {
    provider: Arc<dyn TransactionMatchProvider>,
    retry: RetryPolicy,
}

impl TransactionVerifier {
    pub fn new(provider: Arc<dyn TransactionMatchProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub async fn verify(
        &self,
        identity_hash: &IdentityHash,
        claim: Option<&ClaimedTransaction>,
    ) -> TransactionOutcome {
        let Some(claim) = claim else {
            debug!(identity = %identity_hash.short(), "no purchase claimed");
            return TransactionOutcome {
                outcome: MatchOutcome::Unavailable,
                score: MatchOutcome::Unavailable.score(),
                degraded: false,
            };
        };

        let call = call_with_retry(PROVIDER_NAME, &self.retry, None, || {
            self.provider.match_transaction(identity_hash, claim)
        })
        .await;

        match call.result {
            Ok(outcome) => TransactionOutcome {
                outcome,
                score: outcome.score(),
                degraded: false,
            },
            Err(e) => {
                counter!("feedback_scoring_degraded_total", "component" => "transaction").increment(1);
                warn!(identity = %identity_hash.short(), error = %e, attempts = call.attempts, "transaction match unavailable");
                TransactionOutcome {
                    outcome: MatchOutcome::Unavailable,
                    score: MatchOutcome::Unavailable.score(),
                    degraded: true,
                }
            }
        }
    }
}
