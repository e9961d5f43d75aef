//! Linked accounts, tenant access grants and notification devices.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use sellerdesk_core::{AutoReplySettings, LinkedAccount, LinkedAccountId, NewLinkedAccount, TenantId};

use crate::error::StoreError;

pub use postgres::PgAccountRepository;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn list_account_ids(&self) -> Result<Vec<LinkedAccountId>, StoreError>;

    async fn get(&self, id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError>;

    /// Insert, or on an existing `(tenant, external_user_id)` replace login and
    /// tokens while keeping the auto-reply settings.
    async fn link_account(&self, account: NewLinkedAccount) -> Result<LinkedAccount, StoreError>;

    async fn update_auto_reply(
        &self,
        id: LinkedAccountId,
        settings: &AutoReplySettings,
    ) -> Result<(), StoreError>;

    /// Delete the account and everything referencing it. Returns whether it existed.
    async fn delete(&self, id: LinkedAccountId) -> Result<bool, StoreError>;

    /// Accounts the tenant owns or has been granted.
    async fn accounts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<LinkedAccount>, StoreError>;

    async fn grant_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<(), StoreError>;

    /// Owner or grantee.
    async fn has_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<bool, StoreError>;

    async fn register_device(&self, tenant_id: TenantId, device_token: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<R: AccountRepository + ?Sized> AccountRepository for Arc<R> {
    async fn list_account_ids(&self) -> Result<Vec<LinkedAccountId>, StoreError> {
        (**self).list_account_ids().await
    }

    async fn get(&self, id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError> {
        (**self).get(id).await
    }

    async fn link_account(&self, account: NewLinkedAccount) -> Result<LinkedAccount, StoreError> {
        (**self).link_account(account).await
    }

    async fn update_auto_reply(
        &self,
        id: LinkedAccountId,
        settings: &AutoReplySettings,
    ) -> Result<(), StoreError> {
        (**self).update_auto_reply(id, settings).await
    }

    async fn delete(&self, id: LinkedAccountId) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }

    async fn accounts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<LinkedAccount>, StoreError> {
        (**self).accounts_for_tenant(tenant_id).await
    }

    async fn grant_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<(), StoreError> {
        (**self).grant_access(tenant_id, account_id).await
    }

    async fn has_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        (**self).has_access(tenant_id, account_id).await
    }

    async fn register_device(&self, tenant_id: TenantId, device_token: &str) -> Result<(), StoreError> {
        (**self).register_device(tenant_id, device_token).await
    }
}
