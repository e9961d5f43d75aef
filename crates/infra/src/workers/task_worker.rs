//! Task worker: claim one task, run the auto-responder for its account inside a
//! work scope, record the outcome. Any number of workers may share a queue.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use sellerdesk_core::{Task, TaskStatus};

use crate::jobs::TaskQueue;
use crate::responder::AutoResponder;
use crate::scope::{ScopeFactory, WorkScope};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging.
    pub name: String,
    /// Sleep after an empty claim.
    pub poll_interval: Duration,
    /// Sleep after the claim itself failed.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "task-worker".to_string(),
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(15),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop after the task in hand (if any), wait for the loop to exit and
    /// return the final counts.
    pub async fn shutdown(self) -> WorkerStats {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "task worker panicked");
        }
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct TaskWorker<Q, F> {
    queue: Q,
    scopes: F,
    responder: Arc<AutoResponder>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<Q, F> TaskWorker<Q, F>
where
    Q: TaskQueue + 'static,
    F: ScopeFactory + 'static,
{
    pub fn new(queue: Q, scopes: F, responder: Arc<AutoResponder>, config: WorkerConfig) -> Self {
        Self {
            queue,
            scopes,
            responder,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the loop on the current runtime until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> WorkerHandle {
        let stats = self.stats.clone();
        let loop_token = token.clone();
        let join = tokio::spawn(async move { self.run(loop_token).await });
        WorkerHandle { token, join, stats }
    }

    /// Poll until `shutdown` is cancelled. A task already claimed is always
    /// finished before the loop checks for cancellation again.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker = %self.config.name, "task worker started");

        while !shutdown.is_cancelled() {
            match self.queue.claim_next().await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "failed to claim task");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!(worker = %self.config.name, "task worker stopped");
    }

    /// Run one claimed task to a terminal status.
    #[instrument(skip(self, task), fields(worker = %self.config.name, task_id = %task.id, account_id = %task.account_id))]
    pub async fn process_task(&self, task: Task) -> TaskStatus {
        debug!("claimed task");

        let status = match self.scopes.begin().await {
            Ok(mut scope) => match self.responder.process_account(&mut scope, task.account_id).await {
                Ok(report) => match scope.complete(task.id).await {
                    Ok(()) => {
                        info!(
                            task_id = %task.id,
                            account_id = %task.account_id,
                            handled = report.handled,
                            failed_conversations = report.failed,
                            "task done"
                        );
                        TaskStatus::Done
                    }
                    Err(e) => {
                        error!(task_id = %task.id, account_id = %task.account_id, error = %e, "failed to commit task");
                        self.fail(&task).await
                    }
                },
                Err(e) => {
                    error!(task_id = %task.id, account_id = %task.account_id, error = %e, "task failed");
                    if let Err(e) = scope.rollback().await {
                        error!(task_id = %task.id, error = %e, "rollback failed");
                    }
                    self.fail(&task).await
                }
            },
            Err(e) => {
                error!(task_id = %task.id, account_id = %task.account_id, error = %e, "failed to open work scope");
                self.fail(&task).await
            }
        };

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.processed += 1;
        match status {
            TaskStatus::Done => stats.succeeded += 1,
            _ => stats.failed += 1,
        }
        status
    }

    async fn fail(&self, task: &Task) -> TaskStatus {
        if let Err(e) = self.queue.mark_failed(task.id).await {
            // The row stays `processing`; only a stale reclaim recovers it.
            error!(task_id = %task.id, account_id = %task.account_id, error = %e, "failed to mark task failed");
        }
        TaskStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::accounts::AccountRepository;
    use crate::memory::InMemoryStore;
    use crate::notify::InMemoryNotifier;
    use crate::testing::{marketplace, seed_account};

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_name("test-worker")
            .with_poll_interval(Duration::from_millis(10))
            .with_error_backoff(Duration::from_millis(10))
    }

    async fn worker(server: &MockServer, store: &InMemoryStore) -> TaskWorker<InMemoryStore, InMemoryStore> {
        let responder = AutoResponder::new(marketplace(&server.uri()), Arc::new(InMemoryNotifier::new()));
        TaskWorker::new(store.clone(), store.clone(), Arc::new(responder), fast_config())
    }

    #[tokio::test]
    async fn empty_inbox_completes_the_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": [] })))
            .mount(&server)
            .await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        let worker = worker(&server, &store).await;

        store.enqueue_if_absent(account.id).await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        let status = worker.process_task(task.clone()).await;

        assert_eq!(status, TaskStatus::Done);
        assert_eq!(store.task(task.id).unwrap().status, TaskStatus::Done);
        assert_eq!(
            worker.stats(),
            WorkerStats {
                processed: 1,
                succeeded: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn rejected_refresh_fails_the_task_and_keeps_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
            .expect(1)
            .mount(&server)
            .await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        let worker = worker(&server, &store).await;

        store.enqueue_if_absent(account.id).await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        let status = worker.process_task(task.clone()).await;

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(store.task(task.id).unwrap().status, TaskStatus::Failed);
        let stored = store.get(account.id).await.unwrap().unwrap();
        assert_eq!(stored.tokens, account.tokens);
        assert_eq!(worker.stats().failed, 1);
    }

    async fn mount_expired_token_then_refresh(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer access-0"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 43199
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn refreshed_tokens_commit_with_the_finished_task() {
        let server = MockServer::start().await;
        mount_expired_token_then_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": [] })))
            .expect(1)
            .mount(&server)
            .await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        let worker = worker(&server, &store).await;

        store.enqueue_if_absent(account.id).await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        assert_eq!(worker.process_task(task.clone()).await, TaskStatus::Done);

        assert_eq!(store.task(task.id).unwrap().status, TaskStatus::Done);
        let stored = store.get(account.id).await.unwrap().unwrap();
        assert_ne!(stored.tokens, account.tokens);
        assert_eq!(mp.cipher().decrypt(&stored.tokens.access_token).unwrap(), "access-1");
        assert_eq!(mp.cipher().decrypt(&stored.tokens.refresh_token).unwrap(), "refresh-1");
    }

    #[tokio::test]
    async fn refreshed_tokens_are_discarded_when_the_run_fails() {
        let server = MockServer::start().await;
        mount_expired_token_then_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": "not-a-list" })))
            .expect(1)
            .mount(&server)
            .await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        let worker = worker(&server, &store).await;

        store.enqueue_if_absent(account.id).await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        assert_eq!(worker.process_task(task.clone()).await, TaskStatus::Failed);

        assert_eq!(store.task(task.id).unwrap().status, TaskStatus::Failed);
        let stored = store.get(account.id).await.unwrap().unwrap();
        assert_eq!(stored.tokens, account.tokens);
    }

    #[tokio::test]
    async fn deleted_account_fails_the_task() {
        let server = MockServer::start().await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        let worker = worker(&server, &store).await;

        store.enqueue_if_absent(account.id).await.unwrap();
        let task = store.claim_next().await.unwrap().unwrap();
        // the task row goes with the account; failing must still not error out
        store.delete(account.id).await.unwrap();

        assert_eq!(worker.process_task(task).await, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": [] })))
            .mount(&server)
            .await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let first = seed_account(&store, &mp, "shop-a").await;
        let second = seed_account(&store, &mp, "shop-b").await;
        store.enqueue_if_absent(first.id).await.unwrap();
        store.enqueue_if_absent(second.id).await.unwrap();

        let handle = worker(&server, &store).await.spawn(CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.stats().await.unwrap().done < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue drained");

        assert_eq!(handle.stats().succeeded, 2);
        let stats = tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("worker stopped");
        assert_eq!(stats.processed, 2);
    }

    #[tokio::test]
    async fn cancelled_worker_never_claims() {
        let server = MockServer::start().await;
        let store = InMemoryStore::new();
        let mp = marketplace(&server.uri());
        let account = seed_account(&store, &mp, "shop").await;
        store.enqueue_if_absent(account.id).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        worker(&server, &store).await.run(token).await;

        assert_eq!(store.stats().await.unwrap().pending, 1);
    }
}
