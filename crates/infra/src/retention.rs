//! Time-based retention sweeps for the idempotency log and message metadata.
//!
//! Each sweep is one bulk delete in its own statement; neither touches the task
//! queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument};

use sellerdesk_core::RetentionPolicy;

use crate::error::{StoreError, map_sqlx_error};

#[async_trait]
pub trait RetentionSweeper: Send + Sync {
    /// Delete markers handled strictly before `cutoff`.
    async fn sweep_idempotency_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete metadata recorded strictly before `cutoff`.
    async fn sweep_message_metadata(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgRetentionSweeper {
    pool: PgPool,
}

impl PgRetentionSweeper {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionSweeper for PgRetentionSweeper {
    #[instrument(skip(self), err)]
    async fn sweep_idempotency_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auto_reply_log WHERE handled_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_idempotency_log", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn sweep_message_metadata(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM message_metadata WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_message_metadata", e))?;
        Ok(result.rows_affected())
    }
}

/// Which table a sweep targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SweepKind {
    IdempotencyLog,
    MessageMetadata,
}

impl SweepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::IdempotencyLog => "idempotency_log",
            SweepKind::MessageMetadata => "message_metadata",
        }
    }
}

/// Run one sweep against `now` using the policy's window for that table.
pub async fn run_sweep<S>(
    sweeper: &S,
    policy: &RetentionPolicy,
    kind: SweepKind,
    now: DateTime<Utc>,
) -> Result<u64, StoreError>
where
    S: RetentionSweeper + ?Sized,
{
    let (cutoff, deleted) = match kind {
        SweepKind::IdempotencyLog => {
            let cutoff = policy.idempotency_cutoff(now);
            (cutoff, sweeper.sweep_idempotency_log(cutoff).await?)
        }
        SweepKind::MessageMetadata => {
            let cutoff = policy.metadata_cutoff(now);
            (cutoff, sweeper.sweep_message_metadata(cutoff).await?)
        }
    };
    info!(sweep = kind.as_str(), %cutoff, deleted, "retention sweep finished");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::accounts::AccountRepository;
    use crate::memory::InMemoryStore;
    use crate::testing::new_account;
    use sellerdesk_core::{ConversationId, MessageMetadata};

    #[tokio::test]
    async fn idempotency_sweep_removes_only_entries_past_the_window() {
        let store = InMemoryStore::new();
        let account = store.link_account(new_account("u-1")).await.unwrap();
        let now = Utc::now();

        store.insert_log_entry(ConversationId::new("day-0"), account.id, now);
        store.insert_log_entry(ConversationId::new("day-29"), account.id, now - Duration::days(29));
        store.insert_log_entry(ConversationId::new("day-31"), account.id, now - Duration::days(31));

        let deleted = run_sweep(&store, &RetentionPolicy::default(), SweepKind::IdempotencyLog, now)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        let remaining: Vec<_> = store
            .handled_conversations(account.id)
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(remaining, vec!["day-0", "day-29"]);
    }

    #[tokio::test]
    async fn entry_exactly_at_the_cutoff_is_kept() {
        let store = InMemoryStore::new();
        let account = store.link_account(new_account("u-1")).await.unwrap();
        let now = Utc::now();
        store.insert_log_entry(ConversationId::new("edge"), account.id, now - Duration::days(30));

        let deleted = run_sweep(&store, &RetentionPolicy::default(), SweepKind::IdempotencyLog, now)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn metadata_sweep_uses_its_own_window() {
        let store = InMemoryStore::new();
        let account = store.link_account(new_account("u-1")).await.unwrap();
        let now = Utc::now();
        for (id, age) in [("m-31", 31), ("m-89", 89), ("m-91", 91)] {
            store.insert_metadata(MessageMetadata {
                account_id: account.id,
                conversation_id: ConversationId::new(id),
                message_id: None,
                author_role: "BUYER".into(),
                notified: true,
                replied: false,
                recorded_at: now - Duration::days(age),
            });
        }
        store.insert_log_entry(ConversationId::new("old"), account.id, now - Duration::days(60));

        let deleted = run_sweep(&store, &RetentionPolicy::default(), SweepKind::MessageMetadata, now)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.metadata().len(), 2);
        // the log is untouched by the metadata sweep
        assert_eq!(store.handled_conversations(account.id).len(), 1);
    }
}
