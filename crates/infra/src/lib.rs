//! Infrastructure layer: Postgres stores, the task queue and worker loop, the
//! decision engine, notifications, retention and scheduling.

pub mod access;
pub mod accounts;
pub mod cache;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod jobs;
pub mod linking;
pub mod memory;
pub mod notify;
pub mod producer;
pub mod responder;
pub mod retention;
pub mod scheduler;
pub mod schema;
pub mod scope;
pub mod workers;

#[cfg(test)]
mod testing;

pub use access::AccountAccessGuard;
pub use accounts::{AccountRepository, PgAccountRepository};
pub use cache::TtlCache;
pub use config::{AppConfig, ConfigError};
pub use error::StoreError;
pub use idempotency::IdempotencyLog;
pub use jobs::{PgTaskQueue, TaskQueue, TaskStats};
pub use linking::{AccountLinker, LinkError};
pub use memory::InMemoryStore;
pub use notify::{FcmNotifier, InMemoryNotifier, LogNotifier, Notifier, NotifyError};
pub use producer::{Producer, ProducerReport, RequeueError, requeue};
pub use responder::{AutoResponder, ResponderError, RunReport};
pub use retention::{PgRetentionSweeper, RetentionSweeper, SweepKind, run_sweep};
pub use scheduler::IntervalScheduler;
pub use scope::{PgScope, PgScopeFactory, ScopeFactory, WorkScope};
pub use workers::{TaskWorker, WorkerConfig, WorkerHandle, WorkerStats};
