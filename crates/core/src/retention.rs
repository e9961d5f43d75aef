//! Retention windows for the time-swept tables.

use chrono::{DateTime, Duration, Utc};

use crate::error::DomainError;

/// Longest window accepted from configuration.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// How long idempotency markers and audit metadata are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub idempotency_window: Duration,
    pub metadata_window: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            idempotency_window: Duration::days(30),
            metadata_window: Duration::days(90),
        }
    }
}

impl RetentionPolicy {
    /// Both windows must be within `1..=MAX_RETENTION_DAYS`.
    pub fn from_days(idempotency_days: i64, metadata_days: i64) -> Result<Self, DomainError> {
        Ok(Self {
            idempotency_window: window("idempotency", idempotency_days)?,
            metadata_window: window("metadata", metadata_days)?,
        })
    }

    /// Entries with `handled_at` strictly before this instant are swept.
    pub fn idempotency_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff(now, self.idempotency_window)
    }

    /// Rows with `recorded_at` strictly before this instant are swept.
    pub fn metadata_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff(now, self.metadata_window)
    }
}

fn window(name: &str, days: i64) -> Result<Duration, DomainError> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(DomainError::validation(format!(
            "{name} retention must be between 1 and {MAX_RETENTION_DAYS} days, got {days}"
        )));
    }
    Duration::try_days(days)
        .ok_or_else(|| DomainError::validation(format!("{name} retention of {days} days is out of range")))
}

// a window reaching past the earliest representable instant sweeps nothing
fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
