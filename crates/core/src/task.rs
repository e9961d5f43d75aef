//! Queued unit of work: "check this linked account now".

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{LinkedAccountId, TaskId};

/// Task lifecycle status.
///
/// `pending → processing → {done, failed}`. Nothing leaves a terminal status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Finished successfully
    Done,
    /// Finished with an error; never retried automatically
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Whether this status still occupies the per-account "outstanding task" slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Done)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status: {other}"))),
        }
    }
}

/// One queued account check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub account_id: LinkedAccountId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Set when a worker claims the task.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Set on the terminal transition.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn pending(id: TaskId, account_id: LinkedAccountId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id,
            status: TaskStatus::Pending,
            created_at,
            claimed_at: None,
            processed_at: None,
        }
    }

    /// Apply a status transition, stamping the matching timestamp.
    pub fn transition(&mut self, next: TaskStatus, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "task {}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }

        match next {
            TaskStatus::Processing => self.claimed_at = Some(at),
            TaskStatus::Done | TaskStatus::Failed => self.processed_at = Some(at),
            TaskStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }
}
