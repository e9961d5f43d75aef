//! Persistence seam for refreshed tokens.

use async_trait::async_trait;
use sellerdesk_core::{LinkedAccountId, SealedTokens};

/// Failure to write refreshed tokens back to storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to persist tokens: {0}")]
pub struct CredentialStoreError(pub String);

/// Writes a refreshed token pair onto the linked account row.
///
/// Implementations write inside the caller's unit of work and never commit on
/// their own, so a refresh and the work that triggered it land together.
#[async_trait]
pub trait CredentialStore: Send {
    async fn store_tokens(
        &mut self,
        account_id: LinkedAccountId,
        tokens: &SealedTokens,
    ) -> Result<(), CredentialStoreError>;
}

/// Records writes in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    writes: Vec<(LinkedAccountId, SealedTokens)>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> &[(LinkedAccountId, SealedTokens)] {
        &self.writes
    }

    pub fn latest(&self, account_id: LinkedAccountId) -> Option<&SealedTokens> {
        self.writes
            .iter()
            .rev()
            .find(|(id, _)| *id == account_id)
            .map(|(_, tokens)| tokens)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn store_tokens(
        &mut self,
        account_id: LinkedAccountId,
        tokens: &SealedTokens,
    ) -> Result<(), CredentialStoreError> {
        self.writes.push((account_id, tokens.clone()));
        Ok(())
    }
}
