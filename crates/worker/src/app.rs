//! Wiring from configuration to running components.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sellerdesk_infra::{
    AccountAccessGuard, AccountLinker, AppConfig, AutoResponder, FcmNotifier, IntervalScheduler, LogNotifier,
    Notifier, PgAccountRepository, PgRetentionSweeper, PgScopeFactory, PgTaskQueue, Producer, SweepKind,
    TaskQueue, TaskWorker, WorkerConfig, run_sweep,
};
use sellerdesk_marketplace::Marketplace;
use sellerdesk_vault::AesGcmCipher;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const IDEMPOTENCY_SWEEP_OFFSET: Duration = Duration::from_secs(60 * 60);
const METADATA_SWEEP_OFFSET: Duration = Duration::from_secs(2 * 60 * 60);

pub struct App {
    pub config: AppConfig,
    pub pool: PgPool,
}

impl App {
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to DATABASE_URL")?;
        Ok(Self { config, pool })
    }

    pub fn marketplace(&self) -> Result<Marketplace> {
        let cipher = AesGcmCipher::from_base64_key(&self.config.encryption_key).context("load ENCRYPTION_KEY")?;
        Marketplace::new(self.config.marketplace.clone(), Arc::new(cipher)).context("build marketplace client")
    }

    pub fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        match &self.config.fcm {
            Some(fcm) => {
                let notifier =
                    FcmNotifier::new(&fcm.project_id, &fcm.access_token).context("build FCM notifier")?;
                Ok(Arc::new(notifier))
            }
            None => {
                info!("FCM not configured, notifications are logged only");
                Ok(Arc::new(LogNotifier))
            }
        }
    }

    pub fn queue(&self) -> PgTaskQueue {
        PgTaskQueue::new(self.pool.clone())
    }

    pub fn accounts(&self) -> PgAccountRepository {
        PgAccountRepository::new(self.pool.clone())
    }

    pub fn producer(&self) -> Producer<PgAccountRepository, PgTaskQueue> {
        Producer::new(self.accounts(), self.queue())
    }

    pub fn linker(&self) -> Result<AccountLinker<PgAccountRepository>> {
        Ok(AccountLinker::new(self.marketplace()?, self.accounts()))
    }

    pub fn access_guard(&self) -> AccountAccessGuard<PgAccountRepository> {
        AccountAccessGuard::new(self.accounts())
    }

    /// Run `workers` task workers until `token` is cancelled.
    pub async fn work(&self, workers: usize, token: CancellationToken) -> Result<()> {
        let responder = Arc::new(
            AutoResponder::new(self.marketplace()?, self.notifier()?)
                .with_page_size(self.config.conversation_page_size),
        );

        let handles: Vec<_> = (0..workers.max(1))
            .map(|i| {
                let config = WorkerConfig::default()
                    .with_name(format!("task-worker-{i}"))
                    .with_poll_interval(self.config.poll_interval)
                    .with_error_backoff(self.config.error_backoff);
                TaskWorker::new(
                    self.queue(),
                    PgScopeFactory::new(self.pool.clone()),
                    responder.clone(),
                    config,
                )
                .spawn(token.child_token())
            })
            .collect();

        token.cancelled().await;
        for handle in handles {
            let stats = handle.shutdown().await;
            info!(processed = stats.processed, succeeded = stats.succeeded, failed = stats.failed, "worker stopped");
        }
        Ok(())
    }

    pub async fn sweep(&self, kind: SweepKind) -> Result<u64> {
        let sweeper = PgRetentionSweeper::new(self.pool.clone());
        run_sweep(&sweeper, &self.config.retention, kind, Utc::now())
            .await
            .with_context(|| format!("{} sweep", kind.as_str()))
    }

    /// In-process scheduler: producer cycle, daily sweeps and, when a lease is
    /// configured, stale task reclaim.
    pub fn scheduler(&self) -> IntervalScheduler {
        let producer = Arc::new(self.producer());
        let sweeper = Arc::new(PgRetentionSweeper::new(self.pool.clone()));
        let retention = self.config.retention;

        let mut scheduler = IntervalScheduler::new().every(
            "producer",
            self.config.producer_interval,
            Duration::ZERO,
            move || {
                let producer = producer.clone();
                async move {
                    producer.enqueue_all().await?;
                    Ok(())
                }
            },
        );

        for (kind, offset) in [
            (SweepKind::IdempotencyLog, IDEMPOTENCY_SWEEP_OFFSET),
            (SweepKind::MessageMetadata, METADATA_SWEEP_OFFSET),
        ] {
            let sweeper = sweeper.clone();
            scheduler = scheduler.every(format!("sweep-{}", kind.as_str()), DAY, offset, move || {
                let sweeper = sweeper.clone();
                async move {
                    run_sweep(sweeper.as_ref(), &retention, kind, Utc::now()).await?;
                    Ok(())
                }
            });
        }

        if let Some(lease) = self.config.stale_task_lease {
            let queue = Arc::new(self.queue());
            scheduler = scheduler.every("reclaim-stale", lease, lease, move || {
                let queue = queue.clone();
                async move {
                    let lease = chrono::Duration::from_std(lease)?;
                    let reclaimed = queue.reclaim_stale(Utc::now() - lease).await?;
                    if reclaimed > 0 {
                        tracing::warn!(reclaimed, "stale processing tasks returned to pending");
                    }
                    Ok(())
                }
            });
        }

        scheduler
    }
}
