//! Durable work queue: one task per "check this account now".
//!
//! ## Design
//!
//! - At most one active (`pending` or `processing`) task per linked account
//! - `claim_next` is atomic across processes; losers skip, they never wait
//! - Terminal states are final; nothing here retries a failed task
//!
//! ## Components
//!
//! - `TaskQueue`: queue contract shared by every backend
//! - `PgTaskQueue`: Postgres backend (`FOR UPDATE SKIP LOCKED` claim)
//! - `InMemoryStore` (crate root): in-process backend for tests/dev

pub mod postgres;
pub mod store;

pub use postgres::PgTaskQueue;
pub use store::{TaskQueue, TaskStats};
