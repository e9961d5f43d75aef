//! Postgres-backed task queue.
//!
//! ## Claim
//!
//! ```sql
//! UPDATE task_queue SET status = 'processing', claimed_at = now()
//! WHERE id = (SELECT id FROM task_queue WHERE status = 'pending'
//!             ORDER BY created_at, id LIMIT 1 FOR UPDATE SKIP LOCKED)
//! RETURNING ...
//! ```
//!
//! The sub-select locks exactly one candidate row and skips rows other
//! transactions already hold, so N concurrent claimers get N distinct tasks (or
//! nothing) and none of them block on a slow peer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use sellerdesk_core::{LinkedAccountId, Task, TaskId, TaskStatus};

use super::store::{TaskQueue, TaskStats};
use crate::error::{StoreError, map_sqlx_error};

const TASK_COLUMNS: &str = "id, account_id, status, created_at, claimed_at, processed_at";

#[derive(Debug, Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finish(&self, task_id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = $2, processed_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(task_id.get())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_task", e))?;

        if result.rows_affected() == 0 {
            debug!(task_id = %task_id, status = %status, "task already terminal or unknown");
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn enqueue_if_absent(&self, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_queue (account_id, status, created_at)
            VALUES ($1, 'pending', now())
            ON CONFLICT (account_id) WHERE status IN ('pending', 'processing') DO NOTHING
            "#,
        )
        .bind(account_id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue_task", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let sql = format!(
            r#"
            UPDATE task_queue
            SET status = 'processing', claimed_at = now()
            WHERE id = (
                SELECT id FROM task_queue
                WHERE status = 'pending'
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_task", e))?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn mark_done(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.finish(task_id, TaskStatus::Done).await
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn mark_failed(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.finish(task_id, TaskStatus::Failed).await
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM task_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("task_stats", e))?;

        let mut stats = TaskStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("task_stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("task_stats", e))?;
            let n = n.max(0) as u64;
            match parse_status(&status)? {
                TaskStatus::Pending => stats.pending = n,
                TaskStatus::Processing => stats.processing = n,
                TaskStatus::Done => stats.done = n,
                TaskStatus::Failed => stats.failed = n,
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self), err)]
    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'processing' AND claimed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_stale_tasks", e))?;

        Ok(result.rows_affected())
    }
}

fn parse_status(raw: &str) -> Result<TaskStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown task status {raw:?}")))
}

pub(crate) fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let decode = |e| map_sqlx_error("decode_task", e);
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Task {
        id: TaskId::new(row.try_get("id").map_err(decode)?),
        account_id: LinkedAccountId::new(row.try_get("account_id").map_err(decode)?),
        status: parse_status(&status)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        claimed_at: row.try_get("claimed_at").map_err(decode)?,
        processed_at: row.try_get("processed_at").map_err(decode)?,
    })
}
