//! Tenant-to-account access checks with short-lived memoisation.

use std::time::Duration;

use tracing::debug;

use sellerdesk_core::{LinkedAccountId, TenantId};

use crate::accounts::AccountRepository;
use crate::cache::TtlCache;
use crate::error::StoreError;

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone)]
pub struct AccountAccessGuard<R> {
    accounts: R,
    cache: TtlCache<(TenantId, LinkedAccountId), bool>,
}

impl<R: AccountRepository> AccountAccessGuard<R> {
    pub fn new(accounts: R) -> Self {
        Self::with_cache(accounts, TtlCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES))
    }

    pub fn with_cache(accounts: R, cache: TtlCache<(TenantId, LinkedAccountId), bool>) -> Self {
        Self { accounts, cache }
    }

    pub fn cache(&self) -> &TtlCache<(TenantId, LinkedAccountId), bool> {
        &self.cache
    }

    /// Whether `tenant_id` owns or was granted `account_id`.
    pub async fn can_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        let key = (tenant_id, account_id);
        if let Some(allowed) = self.cache.get(&key) {
            return Ok(allowed);
        }
        let allowed = self.accounts.has_access(tenant_id, account_id).await?;
        debug!(tenant_id = %tenant_id, account_id = %account_id, allowed, "access checked");
        self.cache.insert(key, allowed);
        Ok(allowed)
    }
}
