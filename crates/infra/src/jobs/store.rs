//! Task queue abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sellerdesk_core::{LinkedAccountId, Task, TaskId};

use crate::error::StoreError;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Insert a pending task unless the account already has an active one.
    ///
    /// Returns `true` when a row was inserted.
    async fn enqueue_if_absent(&self, account_id: LinkedAccountId) -> Result<bool, StoreError>;

    /// Atomically move the oldest pending task to `processing` and return it.
    async fn claim_next(&self) -> Result<Option<Task>, StoreError>;

    /// `processing -> done`. No-op on a terminal task.
    async fn mark_done(&self, task_id: TaskId) -> Result<(), StoreError>;

    /// `processing -> failed`. No-op on a terminal task.
    async fn mark_failed(&self, task_id: TaskId) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<TaskStats, StoreError>;

    /// Put `processing` tasks claimed before `older_than` back to `pending`.
    ///
    /// Opt-in lease expiry; the worker never calls this on its own.
    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
impl<Q: TaskQueue + ?Sized> TaskQueue for Arc<Q> {
    async fn enqueue_if_absent(&self, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        (**self).enqueue_if_absent(account_id).await
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        (**self).claim_next().await
    }

    async fn mark_done(&self, task_id: TaskId) -> Result<(), StoreError> {
        (**self).mark_done(task_id).await
    }

    async fn mark_failed(&self, task_id: TaskId) -> Result<(), StoreError> {
        (**self).mark_failed(task_id).await
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        (**self).stats().await
    }

    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).reclaim_stale(older_than).await
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl TaskStats {
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }
}
