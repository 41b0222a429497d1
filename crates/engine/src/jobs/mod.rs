//! Background jobs and the periodic driver that runs them.
//!
//! Each job is a `tick` executed on a fixed interval. A failed tick is
//! logged and the next one runs as usual. `stop()` lets the in-flight tick
//! finish and guarantees no further tick starts.

pub mod cleanup;
pub mod retry;
pub mod scheduler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use herald_common::error::AppError;

pub use cleanup::{CleanupJob, CleanupReport, Retention};
pub use retry::{RetryJob, RetryReport};
pub use scheduler::{SchedulerJob, SchedulerReport};

#[async_trait]
pub trait Job: Send + Sync {
    /// Per-cycle summary, logged after every successful tick.
    type Report: std::fmt::Debug + Send;

    fn name(&self) -> &'static str;

    async fn tick(&self, now: DateTime<Utc>) -> Result<Self::Report, AppError>;
}

/// Drives a [`Job`] on a `tokio::time::interval`, skipping missed ticks.
pub struct PeriodicJob<J: Job> {
    job: Arc<J>,
    period: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<J: Job + 'static> PeriodicJob<J> {
    pub fn new(job: J, period: Duration) -> Self {
        Self {
            job: Arc::new(job),
            period,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the job loop. The first cycle runs immediately.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(job = self.job.name(), "Job already running");
            return;
        }

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let job = Arc::clone(&self.job);
        let period = self.period;

        tracing::info!(job = job.name(), period_secs = period.as_secs_f64(), "Job started");

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                // Cancellation is only observed between cycles
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                run_cycle(job.as_ref()).await;
            }
        }));
    }

    /// Stop scheduling cycles and wait for the in-flight one to finish.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!(job = self.job.name(), error = %e, "Job task panicked");
        }
        tracing::info!(job = self.job.name(), "Job stopped");
    }
}

async fn run_cycle<J: Job>(job: &J) {
    let started = Instant::now();
    match job.tick(Utc::now()).await {
        Ok(report) => {
            tracing::info!(
                job = job.name(),
                report = ?report,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job cycle complete"
            );
        }
        Err(e) => {
            tracing::error!(
                job = job.name(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job cycle failed"
            );
        }
    }
}
