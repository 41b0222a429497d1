//! Scheduler Job: sends notifications whose time has come.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::config::JobConfig;
use herald_common::error::AppError;
use herald_common::types::NotificationStatus;

use crate::dispatcher::Dispatcher;

use super::Job;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Stuck `processing` notifications returned to `pending`
    pub reclaimed: u64,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Claimed by another worker first
    pub skipped: usize,
}

pub struct SchedulerJob {
    dispatcher: Arc<Dispatcher>,
    lease: chrono::Duration,
    batch_size: i64,
}

impl SchedulerJob {
    pub fn new(dispatcher: Arc<Dispatcher>, lease: chrono::Duration, batch_size: i64) -> Self {
        Self {
            dispatcher,
            lease,
            batch_size,
        }
    }

    pub fn from_config(dispatcher: Arc<Dispatcher>, config: &JobConfig) -> Self {
        Self::new(dispatcher, config.processing_lease(), config.batch_size)
    }
}

#[async_trait]
impl Job for SchedulerJob {
    type Report = SchedulerReport;

    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<SchedulerReport, AppError> {
        let notifications = &self.dispatcher.stores().notifications;
        let mut report = SchedulerReport::default();

        // A worker that died mid-dispatch leaves its claim behind; the lease
        // hands those notifications back to the scan.
        report.reclaimed = notifications.reclaim_stale(now - self.lease, now).await?;
        if report.reclaimed > 0 {
            tracing::warn!(
                reclaimed = report.reclaimed,
                lease_secs = self.lease.num_seconds(),
                "Reclaimed notifications stuck in processing"
            );
        }

        let due = notifications.find_scheduled_to_send(now, self.batch_size).await?;

        for mut notification in due {
            let claimed = notifications
                .update_status(
                    notification.id,
                    NotificationStatus::Pending,
                    NotificationStatus::Processing,
                )
                .await?;
            if !claimed {
                tracing::debug!(notification_id = %notification.id, "Notification already claimed");
                report.skipped += 1;
                continue;
            }
            report.claimed += 1;
            notification.status = NotificationStatus::Processing;

            let outcome = self.dispatcher.process(&notification).await?;
            match outcome.status {
                NotificationStatus::Sent => report.sent += 1,
                _ => report.failed += 1,
            }
        }

        Ok(report)
    }
}
