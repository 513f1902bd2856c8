use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scoring::analyzers::TransactionMatchProvider;
use scoring::error::ProviderError;
use scoring::model::{ClaimedTransaction, IdentityHash, MatchOutcome};
use std::collections::HashMap;
use tracing::trace;

/// One claimed purchase: who claimed it, when, and for how much.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClaimKey {
    identity_hash: IdentityHash,
    claimed_at: DateTime<Utc>,
    amount_bits: u64,
}

impl ClaimKey {
    fn new(identity_hash: &IdentityHash, claim: &ClaimedTransaction) -> Self {
        Self {
            identity_hash: identity_hash.clone(),
            claimed_at: claim.occurred_at,
            // -0.0 and 0.0 are the same amount
            amount_bits: (claim.amount + 0.0).to_bits(),
        }
    }
}

/// Serves match outcomes computed upstream by the store's reconciliation job.
///
/// Outcomes are kept per claim, so one identity's submissions never share an
/// answer. Claims without a verification answer `Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedMatchProvider {
    outcomes: HashMap<ClaimKey, MatchOutcome>,
}

impl PrecomputedMatchProvider {
    pub fn insert(&mut self, identity_hash: &IdentityHash, claim: &ClaimedTransaction, outcome: MatchOutcome) {
        self.outcomes.insert(ClaimKey::new(identity_hash, claim), outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[async_trait]
impl TransactionMatchProvider for PrecomputedMatchProvider {
    async fn match_transaction(
        &self,
        identity_hash: &IdentityHash,
        claim: &ClaimedTransaction,
    ) -> Result<MatchOutcome, ProviderError> {
        let outcome = self
            .outcomes
            .get(&ClaimKey::new(identity_hash, claim))
            .copied()
            .unwrap_or(MatchOutcome::Unavailable);
        trace!(identity = %identity_hash.short(), amount = claim.amount, %outcome, "precomputed match");
        Ok(outcome)
    }
}
