//! Background workers.

pub mod task_worker;

pub use task_worker::{TaskWorker, WorkerConfig, WorkerHandle, WorkerStats};
