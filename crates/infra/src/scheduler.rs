//! Fixed-interval scheduler for periodic jobs (producer cycle, retention sweeps).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct ScheduledJob {
    name: String,
    period: Duration,
    offset: Duration,
    run: JobFn,
}

#[derive(Default)]
pub struct IntervalScheduler {
    jobs: Vec<ScheduledJob>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period` (at least 1ms), first after `offset`.
    pub fn every<F, Fut>(mut self, name: impl Into<String>, period: Duration, offset: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.jobs.push(ScheduledJob {
            name: name.into(),
            period: period.max(Duration::from_millis(1)),
            offset,
            run: Arc::new(move || Box::pin(job()) as JobFuture),
        });
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Run every job until `token` is cancelled. A run in progress is finished
    /// first. Job errors are logged and the schedule continues.
    pub async fn run(self, token: CancellationToken) {
        let mut set = JoinSet::new();
        for job in self.jobs {
            set.spawn(run_job(job, token.clone()));
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "scheduled job panicked");
            }
        }
    }
}

async fn run_job(job: ScheduledJob, token: CancellationToken) {
    info!(job = %job.name, period_secs = job.period.as_secs(), offset_secs = job.offset.as_secs(), "job scheduled");

    let Some(start) = Instant::now().checked_add(job.offset) else {
        error!(job = %job.name, "offset out of range, job never runs");
        token.cancelled().await;
        return;
    };
    let mut ticker = tokio::time::interval_at(start, job.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                debug!(job = %job.name, "job starting");
                if let Err(e) = (job.run)().await {
                    error!(job = %job.name, error = %format!("{e:#}"), "scheduled job failed");
                }
            }
        }
    }

    debug!(job = %job.name, "job stopped");
}

impl std::fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("jobs", &self.job_names())
            .finish()
    }
}
