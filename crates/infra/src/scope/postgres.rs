//! Work scope over a single Postgres transaction.
//!
//! Postgres silently turns `COMMIT` of an aborted transaction into a rollback, so
//! the scope remembers any failed statement itself and refuses to `complete`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};

use sellerdesk_core::{
    ConversationId, LinkedAccount, LinkedAccountId, MessageMetadata, SealedTokens, TaskId, TenantId,
};
use sellerdesk_marketplace::{CredentialStore, CredentialStoreError};

use super::{ScopeFactory, WorkScope};
use crate::accounts::postgres::{ACCOUNT_COLUMNS, account_from_row};
use crate::error::{StoreError, map_sqlx_error};
use crate::idempotency::IdempotencyLog;

#[derive(Debug, Clone)]
pub struct PgScopeFactory {
    pool: PgPool,
}

impl PgScopeFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScopeFactory for PgScopeFactory {
    type Scope = PgScope;

    async fn begin(&self) -> Result<PgScope, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_scope", e))?;
        Ok(PgScope { tx, poisoned: false })
    }
}

pub struct PgScope {
    tx: Transaction<'static, Postgres>,
    poisoned: bool,
}

impl PgScope {
    fn check(&mut self, operation: &'static str, result: Result<(), sqlx::Error>) -> Result<(), StoreError> {
        result.map_err(|e| {
            self.poisoned = true;
            map_sqlx_error(operation, e)
        })
    }
}

#[async_trait]
impl WorkScope for PgScope {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn lock_account(&mut self, account_id: LinkedAccountId) -> Result<(), StoreError> {
        let result = sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(account_id.get())
            .execute(&mut *self.tx)
            .await
            .map(|_| ());
        self.check("lock_account", result)
    }

    async fn load_account(&mut self, account_id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError> {
        let result = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts WHERE id = $1"))
            .bind(account_id.get())
            .fetch_optional(&mut *self.tx)
            .await;
        match result {
            Ok(row) => row.map(|r| account_from_row(&r)).transpose(),
            Err(e) => {
                self.poisoned = true;
                Err(map_sqlx_error("load_account", e))
            }
        }
    }

    async fn device_tokens(&mut self, tenant_id: TenantId) -> Result<Vec<String>, StoreError> {
        let result = sqlx::query(
            "SELECT device_token FROM tenant_devices WHERE tenant_id = $1 ORDER BY device_token",
        )
        .bind(*tenant_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await;
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                self.poisoned = true;
                return Err(map_sqlx_error("device_tokens", e));
            }
        };
        rows.iter()
            .map(|r| r.try_get("device_token").map_err(|e| map_sqlx_error("device_tokens", e)))
            .collect()
    }

    async fn record_metadata(&mut self, metadata: &MessageMetadata) -> Result<(), StoreError> {
        // savepoint keeps a failed insert from aborting the whole transaction
        let begin = sqlx::query("SAVEPOINT record_metadata")
            .execute(&mut *self.tx)
            .await
            .map(|_| ());
        self.check("record_metadata", begin)?;

        let insert = sqlx::query(
            r#"
            INSERT INTO message_metadata
                (account_id, conversation_id, message_id, author_role, notified, replied, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(metadata.account_id.get())
        .bind(metadata.conversation_id.as_str())
        .bind(metadata.message_id.as_deref())
        .bind(&metadata.author_role)
        .bind(metadata.notified)
        .bind(metadata.replied)
        .bind(metadata.recorded_at)
        .execute(&mut *self.tx)
        .await;

        match insert {
            Ok(_) => {
                let release = sqlx::query("RELEASE SAVEPOINT record_metadata")
                    .execute(&mut *self.tx)
                    .await
                    .map(|_| ());
                self.check("record_metadata", release)
            }
            Err(e) => {
                let undo = sqlx::query("ROLLBACK TO SAVEPOINT record_metadata")
                    .execute(&mut *self.tx)
                    .await
                    .map(|_| ());
                self.check("record_metadata", undo)?;
                Err(map_sqlx_error("record_metadata", e))
            }
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn complete(mut self, task_id: TaskId) -> Result<(), StoreError> {
        if self.poisoned {
            let _ = self.tx.rollback().await;
            return Err(StoreError::Poisoned);
        }

        let result = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 'done', processed_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(task_id.get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("complete_task", e))?;

        if result.rows_affected() == 0 {
            debug!(task_id = %task_id, "task was not processing at completion");
        }

        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_scope", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_scope", e))
    }
}

#[async_trait]
impl IdempotencyLog for PgScope {
    async fn is_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM auto_reply_log WHERE conversation_id = $1 AND account_id = $2) AS handled",
        )
        .bind(conversation_id.as_str())
        .bind(account_id.get())
        .fetch_one(&mut *self.tx)
        .await;
        match result {
            Ok(row) => row.try_get("handled").map_err(|e| map_sqlx_error("is_handled", e)),
            Err(e) => {
                self.poisoned = true;
                Err(map_sqlx_error("is_handled", e))
            }
        }
    }

    async fn mark_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
        handled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO auto_reply_log (conversation_id, account_id, handled_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (conversation_id, account_id) DO NOTHING
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(account_id.get())
        .bind(handled_at)
        .execute(&mut *self.tx)
        .await
        .map(|_| ());
        self.check("mark_handled", result)
    }
}

#[async_trait]
impl CredentialStore for PgScope {
    async fn store_tokens(
        &mut self,
        account_id: LinkedAccountId,
        tokens: &SealedTokens,
    ) -> Result<(), CredentialStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE linked_accounts
            SET access_token = $2, refresh_token = $3, expires_at = $4
            WHERE id = $1
            "#,
        )
        .bind(account_id.get())
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.expires_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => {
                self.poisoned = true;
                Err(CredentialStoreError(format!("linked account {account_id} not found")))
            }
            Err(e) => {
                self.poisoned = true;
                warn!(account_id = %account_id, error = %e, "failed to persist refreshed tokens");
                Err(CredentialStoreError(e.to_string()))
            }
        }
    }
}
