//! Repository boundary consumed by the dispatcher and the background jobs.
//!
//! Every status change that guards concurrent work (`update_status`) is a
//! compare-and-swap: it only applies when the row is still in the expected
//! state, so two replicas racing for the same record cannot both win.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    AnalyticsRecord, Delivery, DeliveryStatus, Notification, NotificationStatus,
    NotificationTemplate,
};

/// Reject status changes outside the notification lifecycle.
pub(crate) fn check_notification_transition(
    from: NotificationStatus,
    to: NotificationStatus,
) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "notification cannot move from {from} to {to}"
        )))
    }
}

pub(crate) fn check_delivery_transition(
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "delivery cannot move from {from} to {to}"
        )))
    }
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// `pending` notifications whose send time (scheduled, or creation for
    /// unscheduled ones) has arrived, oldest first.
    async fn find_scheduled_to_send(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError>;

    /// Atomically move `id` from `from` to `to`. Returns `false` when the row
    /// was not in `from` (someone else got there first). A backward move is a
    /// `Validation` error and never reaches storage.
    async fn update_status(
        &self,
        id: Uuid,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<bool, AppError>;

    /// Return `processing` rows not touched since `cutoff` to `pending`,
    /// stamped with `now`.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn insert(&self, delivery: &Delivery) -> Result<(), AppError>;

    async fn find_by_notification(&self, notification_id: Uuid) -> Result<Vec<Delivery>, AppError>;

    /// `failed` deliveries with `next_retry_at <= now` and attempts left.
    async fn find_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Delivery>, AppError>;

    /// Compare-and-swap on status; see [`NotificationRepository::update_status`].
    async fn update_status(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool, AppError>;

    /// Persist the outcome of an attempt (status, provider, attempt count,
    /// error, next retry).
    async fn save_attempt(&self, delivery: &Delivery) -> Result<(), AppError>;

    /// Terminal failure: no further retries will be scheduled.
    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), AppError>;

    /// Claimed retries stuck in `pending` since `cutoff` go back to `failed`
    /// with a retry due at `now`.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), AppError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<NotificationTemplate>, AppError>;
}

/// The repositories the engine needs, shared between the dispatcher and jobs.
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub templates: Arc<dyn TemplateRepository>,
}

impl Stores {
    /// PostgreSQL-backed repositories sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            notifications: Arc::new(postgres::PgNotificationRepository::new(pool.clone())),
            deliveries: Arc::new(postgres::PgDeliveryRepository::new(pool.clone())),
            analytics: Arc::new(postgres::PgAnalyticsRepository::new(pool.clone())),
            templates: Arc::new(postgres::PgTemplateRepository::new(pool)),
        }
    }

    /// Process-local repositories, for tests and single-process embedding.
    pub fn in_memory() -> (Self, memory::MemoryStore) {
        let store = memory::MemoryStore::default();
        let stores = Self {
            notifications: Arc::new(store.clone()),
            deliveries: Arc::new(store.clone()),
            analytics: Arc::new(store.clone()),
            templates: Arc::new(store.clone()),
        };
        (stores, store)
    }
}
