//! Cleanup Job: purges records older than their retention windows,
//! regardless of status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::config::JobConfig;
use herald_common::error::AppError;

use crate::store::Stores;

use super::Job;

/// Retention windows per table.
#[derive(Debug, Clone)]
pub struct Retention {
    pub notifications: chrono::Duration,
    pub deliveries: chrono::Duration,
    pub analytics: chrono::Duration,
}

impl Retention {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            notifications: chrono::Duration::days(config.notification_retention_days),
            deliveries: chrono::Duration::days(config.delivery_retention_days),
            analytics: chrono::Duration::days(config.analytics_retention_days),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub deliveries: u64,
    pub notifications: u64,
    pub analytics: u64,
}

pub struct CleanupJob {
    stores: Stores,
    retention: Retention,
}

impl CleanupJob {
    pub fn new(stores: Stores, retention: Retention) -> Self {
        Self { stores, retention }
    }
}

#[async_trait]
impl Job for CleanupJob {
    type Report = CleanupReport;

    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<CleanupReport, AppError> {
        // Deliveries first so their own window applies before the
        // notification cascade removes the rest.
        let deliveries = self
            .stores
            .deliveries
            .delete_older_than(now - self.retention.deliveries)
            .await?;
        let notifications = self
            .stores
            .notifications
            .delete_older_than(now - self.retention.notifications)
            .await?;
        let analytics = self
            .stores
            .analytics
            .delete_older_than(now - self.retention.analytics)
            .await?;

        Ok(CleanupReport {
            deliveries,
            notifications,
            analytics,
        })
    }
}
