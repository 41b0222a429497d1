//! In-memory repositories with the same compare-and-swap semantics as the
//! PostgreSQL implementations. One `MemoryStore` serves all four traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
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

#[derive(Default)]
struct Inner {
    notifications: HashMap<Uuid, Notification>,
    deliveries: HashMap<Uuid, Delivery>,
    analytics: Vec<AnalyticsRecord>,
    templates: HashMap<String, NotificationTemplate>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub async fn put_template(&self, template: NotificationTemplate) {
        let mut inner = self.inner.lock().await;
        inner.templates.insert(template.slug.clone(), template);
    }

    pub async fn notification(&self, id: Uuid) -> Option<Notification> {
        self.inner.lock().await.notifications.get(&id).cloned()
    }

    /// Overwrite a stored notification (tests use this to age records).
    pub async fn put_notification(&self, notification: Notification) {
        let mut inner = self.inner.lock().await;
        inner.notifications.insert(notification.id, notification);
    }

    pub async fn delivery(&self, id: Uuid) -> Option<Delivery> {
        self.inner.lock().await.deliveries.get(&id).cloned()
    }

    pub async fn put_delivery(&self, delivery: Delivery) {
        let mut inner = self.inner.lock().await;
        inner.deliveries.insert(delivery.id, delivery);
    }

    pub async fn deliveries_for(&self, notification_id: Uuid) -> Vec<Delivery> {
        let inner = self.inner.lock().await;
        let mut found: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| d.notification_id == notification_id)
            .cloned()
            .collect();
        found.sort_by_key(|d| d.created_at);
        found
    }

    pub async fn analytics_records(&self) -> Vec<AnalyticsRecord> {
        self.inner.lock().await.analytics.clone()
    }

    pub async fn put_analytics(&self, record: AnalyticsRecord) {
        self.inner.lock().await.analytics.push(record);
    }

    pub async fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().await;
        (
            inner.notifications.len(),
            inner.deliveries.len(),
            inner.analytics.len(),
        )
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if inner.notifications.contains_key(&notification.id) {
            return Err(AppError::Internal(format!(
                "notification {} already exists",
                notification.id
            )));
        }
        inner.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        Ok(self.inner.lock().await.notifications.get(&id).cloned())
    }

    async fn find_scheduled_to_send(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.status == NotificationStatus::Pending)
            .filter(|n| n.scheduled_for.unwrap_or(n.created_at) <= now)
            .cloned()
            .collect();
        due.sort_by_key(|n| n.scheduled_for.unwrap_or(n.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<bool, AppError> {
        check_notification_transition(from, to)?;
        let mut inner = self.inner.lock().await;
        match inner.notifications.get_mut(&id) {
            Some(n) if n.status == from => {
                n.status = to;
                n.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let mut reclaimed = 0;
        for n in inner.notifications.values_mut() {
            if n.status == NotificationStatus::Processing && n.updated_at < cutoff {
                n.status = NotificationStatus::Pending;
                n.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<Uuid> = inner
            .notifications
            .values()
            .filter(|n| n.created_at < cutoff)
            .map(|n| n.id)
            .collect();
        for id in &doomed {
            inner.notifications.remove(id);
        }
        // Mirror ON DELETE CASCADE
        inner
            .deliveries
            .retain(|_, d| !doomed.contains(&d.notification_id));
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl DeliveryRepository for MemoryStore {
    async fn insert(&self, delivery: &Delivery) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner.deliveries.values().any(|d| {
            d.notification_id == delivery.notification_id && d.channel == delivery.channel
        });
        if duplicate {
            return Err(AppError::Internal(format!(
                "delivery for notification {} on {} already exists",
                delivery.notification_id, delivery.channel
            )));
        }
        inner.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn find_by_notification(&self, notification_id: Uuid) -> Result<Vec<Delivery>, AppError> {
        Ok(self.deliveries_for(notification_id).await)
    }

    async fn find_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Delivery>, AppError> {
        let inner = self.inner.lock().await;
        let mut ready: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Failed)
            .filter(|d| d.attempt_count < max_attempts)
            .filter(|d| d.next_retry_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        ready.sort_by_key(|d| d.next_retry_at);
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool, AppError> {
        check_delivery_transition(from, to)?;
        let mut inner = self.inner.lock().await;
        match inner.deliveries.get_mut(&id) {
            Some(d) if d.status == from => {
                d.status = to;
                d.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_attempt(&self, delivery: &Delivery) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        match inner.deliveries.get_mut(&delivery.id) {
            Some(existing) => {
                *existing = delivery.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("delivery {}", delivery.id))),
        }
    }

    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let delivery = inner
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))?;
        delivery.status = DeliveryStatus::Failed;
        delivery.last_error = Some(reason.to_string());
        delivery.next_retry_at = None;
        delivery.updated_at = Utc::now();
        Ok(())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let mut reclaimed = 0;
        for d in inner.deliveries.values_mut() {
            if d.status == DeliveryStatus::Pending && d.updated_at < cutoff {
                d.status = DeliveryStatus::Failed;
                d.next_retry_at = Some(now);
                d.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let before = inner.deliveries.len();
        inner.deliveries.retain(|_, d| d.created_at >= cutoff);
        Ok((before - inner.deliveries.len()) as u64)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), AppError> {
        self.inner.lock().await.analytics.push(record.clone());
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let before = inner.analytics.len();
        inner.analytics.retain(|r| r.created_at >= cutoff);
        Ok((before - inner.analytics.len()) as u64)
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<NotificationTemplate>, AppError> {
        Ok(self.inner.lock().await.templates.get(slug).cloned())
    }
}
