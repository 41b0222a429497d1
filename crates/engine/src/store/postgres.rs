//! PostgreSQL repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    AnalyticsRecord, Delivery, DeliveryStatus, Notification, NotificationStatus,
    NotificationTemplate,
};

use super::{
    AnalyticsRepository, DeliveryRepository, NotificationRepository, TemplateRepository,
    check_delivery_transition, check_notification_transition,
};

pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, notification_type, title, message, channels, priority,
                 scheduled_for, data, metadata, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(Json(&notification.channels))
        .bind(notification.priority.to_string())
        .bind(notification.scheduled_for)
        .bind(&notification.data)
        .bind(&notification.metadata)
        .bind(notification.status.to_string())
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notification: Option<Notification> =
            sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(notification)
    }

    async fn find_scheduled_to_send(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let due: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE status = 'pending'
              AND COALESCE(scheduled_for, created_at) <= $1
            ORDER BY COALESCE(scheduled_for, created_at) ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<bool, AppError> {
        check_notification_transition(from, to)?;

        // Worker clock, same as the lease cutoff
        let result = sqlx::query(
            "UPDATE notifications SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(to.to_string())
        .bind(Utc::now())
        .bind(id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'pending', updated_at = $2
            WHERE status = 'processing' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn insert(&self, delivery: &Delivery) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO deliveries
                (id, notification_id, channel, provider_id, status, attempt_count,
                 last_error, next_retry_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.notification_id)
        .bind(delivery.channel.to_string())
        .bind(&delivery.provider_id)
        .bind(delivery.status.to_string())
        .bind(delivery.attempt_count)
        .bind(&delivery.last_error)
        .bind(delivery.next_retry_at)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_notification(&self, notification_id: Uuid) -> Result<Vec<Delivery>, AppError> {
        let deliveries: Vec<Delivery> = sqlx::query_as(
            "SELECT * FROM deliveries WHERE notification_id = $1 ORDER BY created_at ASC",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }

    async fn find_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Delivery>, AppError> {
        let ready: Vec<Delivery> = sqlx::query_as(
            r#"
            SELECT * FROM deliveries
            WHERE status = 'failed'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
              AND attempt_count < $2
            ORDER BY next_retry_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ready)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool, AppError> {
        check_delivery_transition(from, to)?;

        let result = sqlx::query(
            "UPDATE deliveries SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(to.to_string())
        .bind(Utc::now())
        .bind(id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_attempt(&self, delivery: &Delivery) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET provider_id = $1, status = $2, attempt_count = $3,
                last_error = $4, next_retry_at = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(&delivery.provider_id)
        .bind(delivery.status.to_string())
        .bind(delivery.attempt_count)
        .bind(&delivery.last_error)
        .bind(delivery.next_retry_at)
        .bind(delivery.updated_at)
        .bind(delivery.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Delivery {} not found", delivery.id)));
        }

        Ok(())
    }

    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'failed', last_error = $1, next_retry_at = NULL, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Delivery {} not found", id)));
        }

        Ok(())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries SET status = 'failed', next_retry_at = $2, updated_at = $2
            WHERE status = 'pending' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM deliveries WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub struct PgAnalyticsRepository {
    pool: PgPool,
}

impl PgAnalyticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsRepository for PgAnalyticsRepository {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notification_analytics
                (id, notification_id, channel, provider_id, event, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.notification_id)
        .bind(record.channel.to_string())
        .bind(&record.provider_id)
        .bind(record.event.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM notification_analytics WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<NotificationTemplate>, AppError> {
        let template: Option<NotificationTemplate> =
            sqlx::query_as("SELECT * FROM notification_templates WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;

        Ok(template)
    }
}
