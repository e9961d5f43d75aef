//! Transactional unit of work for one claimed task.
//!
//! Everything the decision engine writes (refreshed tokens, idempotency markers,
//! metadata) and the task's `done` status commit together in `complete`.

pub mod postgres;

use async_trait::async_trait;

use sellerdesk_core::{LinkedAccount, LinkedAccountId, MessageMetadata, TaskId, TenantId};
use sellerdesk_marketplace::CredentialStore;

use crate::error::StoreError;
use crate::idempotency::IdempotencyLog;

pub use postgres::{PgScope, PgScopeFactory};

#[async_trait]
pub trait WorkScope: CredentialStore + IdempotencyLog + Send {
    /// Serialize work on one account for the rest of this scope.
    async fn lock_account(&mut self, account_id: LinkedAccountId) -> Result<(), StoreError>;

    async fn load_account(&mut self, account_id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError>;

    /// Notification targets of a tenant.
    async fn device_tokens(&mut self, tenant_id: TenantId) -> Result<Vec<String>, StoreError>;

    /// Best-effort audit row. A failure here does not poison the scope.
    async fn record_metadata(&mut self, metadata: &MessageMetadata) -> Result<(), StoreError>;

    /// Mark `task_id` done and commit. Refused with `Poisoned` if any statement failed.
    async fn complete(self, task_id: TaskId) -> Result<(), StoreError>;

    /// Discard everything written in this scope.
    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ScopeFactory: Send + Sync {
    type Scope: WorkScope + 'static;

    async fn begin(&self) -> Result<Self::Scope, StoreError>;
}
