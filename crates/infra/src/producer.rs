//! Producer: one task per linked account, plus the operator requeue path.

use thiserror::Error;
use tracing::{info, instrument, warn};

use sellerdesk_core::{LinkedAccountId, TenantId};

use crate::access::AccountAccessGuard;
use crate::accounts::AccountRepository;
use crate::error::StoreError;
use crate::jobs::TaskQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProducerReport {
    pub enqueued: u32,
    pub already_queued: u32,
    pub failed: u32,
}

#[derive(Debug, Clone)]
pub struct Producer<A, Q> {
    accounts: A,
    queue: Q,
}

impl<A: AccountRepository, Q: TaskQueue> Producer<A, Q> {
    pub fn new(accounts: A, queue: Q) -> Self {
        Self { accounts, queue }
    }

    /// Enqueue a check for every registered account. Accounts with an active
    /// task are skipped; a failed enqueue is logged and does not stop the cycle.
    #[instrument(skip(self))]
    pub async fn enqueue_all(&self) -> Result<ProducerReport, StoreError> {
        let ids = self.accounts.list_account_ids().await?;
        let mut report = ProducerReport::default();

        for account_id in ids {
            match self.queue.enqueue_if_absent(account_id).await {
                Ok(true) => report.enqueued += 1,
                Ok(false) => report.already_queued += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(account_id = %account_id, error = %e, "failed to enqueue account");
                }
            }
        }

        info!(
            enqueued = report.enqueued,
            already_queued = report.already_queued,
            failed = report.failed,
            "producer cycle finished"
        );
        Ok(report)
    }
}

#[derive(Debug, Error)]
pub enum RequeueError {
    #[error("tenant {tenant_id} has no access to account {account_id}")]
    Forbidden {
        tenant_id: TenantId,
        account_id: LinkedAccountId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Operator re-enqueue of one account on behalf of `tenant_id`.
///
/// Returns `false` when the account already has an active task.
#[instrument(skip(guard, queue))]
pub async fn requeue<R, Q>(
    guard: &AccountAccessGuard<R>,
    queue: &Q,
    tenant_id: TenantId,
    account_id: LinkedAccountId,
) -> Result<bool, RequeueError>
where
    R: AccountRepository,
    Q: TaskQueue + ?Sized,
{
    if !guard.can_access(tenant_id, account_id).await? {
        return Err(RequeueError::Forbidden { tenant_id, account_id });
    }
    let inserted = queue.enqueue_if_absent(account_id).await?;
    info!(tenant_id = %tenant_id, account_id = %account_id, inserted, "account requeued");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testing::new_account;
    use sellerdesk_core::TaskStatus;

    #[tokio::test]
    async fn each_account_gets_one_active_task() {
        let store = InMemoryStore::new();
        store.link_account(new_account("u-1")).await.unwrap();
        store.link_account(new_account("u-2")).await.unwrap();
        let producer = Producer::new(store.clone(), store.clone());

        let first = producer.enqueue_all().await.unwrap();
        assert_eq!(first.enqueued, 2);

        let second = producer.enqueue_all().await.unwrap();
        assert_eq!(
            second,
            ProducerReport {
                enqueued: 0,
                already_queued: 2,
                failed: 0
            }
        );
        assert_eq!(store.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn failed_task_is_picked_up_by_the_next_cycle() {
        let store = InMemoryStore::new();
        let account = store.link_account(new_account("u-1")).await.unwrap();
        let producer = Producer::new(store.clone(), store.clone());

        producer.enqueue_all().await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        store.mark_failed(task.id).await.unwrap();

        let report = producer.enqueue_all().await.unwrap();
        assert_eq!(report.enqueued, 1);
        let statuses: Vec<_> = store.tasks_for(account.id).into_iter().map(|t| t.status).collect();
        assert!(statuses.contains(&TaskStatus::Failed));
        assert!(statuses.contains(&TaskStatus::Pending));
    }

    #[tokio::test]
    async fn requeue_checks_tenant_access() {
        let store = InMemoryStore::new();
        let account = store.link_account(new_account("u-1")).await.unwrap();
        let guard = AccountAccessGuard::new(store.clone());

        let err = requeue(&guard, &store, TenantId::new(), account.id).await.unwrap_err();
        assert!(matches!(err, RequeueError::Forbidden { .. }));
        assert_eq!(store.stats().await.unwrap().pending, 0);

        assert!(requeue(&guard, &store, account.tenant_id, account.id).await.unwrap());
        assert!(!requeue(&guard, &store, account.tenant_id, account.id).await.unwrap());
    }
}
