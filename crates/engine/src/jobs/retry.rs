//! Retry Job: re-attempts failed deliveries whose backoff has elapsed.
//!
//! Only the failed channel is retried, never the whole notification.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::config::JobConfig;
use herald_common::error::AppError;
use herald_common::types::DeliveryStatus;

use crate::dispatcher::Dispatcher;

use super::Job;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    /// Claimed retries abandoned by a dead worker, made due again
    pub reclaimed: u64,
    pub retried: usize,
    pub sent: usize,
    /// Failed again with a retry scheduled
    pub failed: usize,
    /// Failed terminally (attempts used up, rejected, or orphaned)
    pub exhausted: usize,
    pub skipped: usize,
}

pub struct RetryJob {
    dispatcher: Arc<Dispatcher>,
    lease: chrono::Duration,
    batch_size: i64,
}

impl RetryJob {
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
impl Job for RetryJob {
    type Report = RetryReport;

    fn name(&self) -> &'static str {
        "retry"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<RetryReport, AppError> {
        let stores = self.dispatcher.stores();
        let mut report = RetryReport::default();

        report.reclaimed = stores.deliveries.reclaim_stale(now - self.lease, now).await?;
        if report.reclaimed > 0 {
            tracing::warn!(reclaimed = report.reclaimed, "Reclaimed deliveries stuck in retry");
        }

        let max_attempts = self.dispatcher.retry_policy().max_attempts;
        let ready = stores
            .deliveries
            .find_ready_for_retry(now, max_attempts, self.batch_size)
            .await?;

        for delivery in ready {
            let claimed = stores
                .deliveries
                .update_status(delivery.id, DeliveryStatus::Failed, DeliveryStatus::Pending)
                .await?;
            if !claimed {
                report.skipped += 1;
                continue;
            }

            let Some(notification) = stores.notifications.find_by_id(delivery.notification_id).await?
            else {
                tracing::warn!(
                    delivery_id = %delivery.id,
                    notification_id = %delivery.notification_id,
                    "Delivery has no notification; giving up"
                );
                stores
                    .deliveries
                    .mark_as_failed(delivery.id, "notification not found")
                    .await?;
                report.exhausted += 1;
                continue;
            };

            report.retried += 1;
            let attempted = self.dispatcher.retry_delivery(&notification, delivery).await?;
            if attempted.status == DeliveryStatus::Sent {
                report.sent += 1;
            } else if attempted.is_terminal_failure() {
                report.exhausted += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }
}
