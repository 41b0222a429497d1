//! Notification Dispatcher: the `send` operation.
//!
//! A send validates the channel list, resolves content (optionally from a
//! template), persists the notification and, unless it is scheduled for
//! later, fans out over the channels concurrently. Each channel walks its
//! provider chain in priority order until one provider accepts the message.
//! Channel failures are isolated from each other; repository failures are
//! propagated to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::config::DeliveryConfig;
use herald_common::error::AppError;
use herald_common::types::{
    AnalyticsEvent, AnalyticsRecord, ChannelKind, Delivery, DeliveryStatus, Notification,
    NotificationStatus, Priority,
};
use herald_providers::{MessageContent, ProviderError, ProviderRegistry, Recipient};

use crate::store::Stores;
use crate::template::render_template;
use crate::tracker::{AttemptOutcome, DeliveryTracker, RetryPolicy};

/// Input of a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub user_id: Uuid,
    pub notification_type: String,
    #[serde(default)]
    pub message: String,
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub template_slug: Option<String>,
    #[serde(default)]
    pub template_params: serde_json::Value,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub scheduled_for: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Per-channel part of a send result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelResult {
    pub channel: ChannelKind,
    pub success: bool,
    pub provider_id: Option<String>,
    pub delivery_id: Option<Uuid>,
    pub error: Option<String>,
}

impl ChannelResult {
    fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            channel: delivery.channel,
            success: delivery.status == DeliveryStatus::Sent,
            provider_id: delivery.provider_id.clone(),
            delivery_id: Some(delivery.id),
            error: delivery.last_error.clone(),
        }
    }
}

/// Aggregate result of a send. Whether partial success counts as success
/// is up to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub notification_id: Uuid,
    pub status: NotificationStatus,
    /// Persisted for later delivery; no provider was contacted.
    pub scheduled: bool,
    pub channels: Vec<ChannelResult>,
}

impl SendOutcome {
    pub fn any_succeeded(&self) -> bool {
        self.channels.iter().any(|c| c.success)
    }
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    stores: Stores,
    tracker: DeliveryTracker,
    provider_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        stores: Stores,
        policy: RetryPolicy,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            stores,
            tracker: DeliveryTracker::new(policy),
            provider_timeout,
        }
    }

    pub fn from_config(registry: Arc<ProviderRegistry>, stores: Stores, config: &DeliveryConfig) -> Self {
        Self::new(
            registry,
            stores,
            RetryPolicy::from_config(config),
            config.provider_timeout(),
        )
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.tracker.policy()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Accept a notification intent and deliver it now, or persist it for
    /// the Scheduler Job if `scheduled_for` lies in the future.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, AppError> {
        let channels = dedup_channels(&request.channels);
        if channels.is_empty() {
            return Err(AppError::Validation(
                "At least one channel is required".to_string(),
            ));
        }

        let (title, message) = self.resolve_content(&request).await?;

        let now = Utc::now();
        let scheduled = request.scheduled_for.is_some_and(|at| at > now);
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            notification_type: request.notification_type,
            title,
            message,
            channels,
            priority: request.priority,
            scheduled_for: request.scheduled_for,
            data: object_or_empty(request.data),
            metadata: object_or_empty(request.metadata),
            status: if scheduled {
                NotificationStatus::Pending
            } else {
                NotificationStatus::Processing
            },
            created_at: now,
            updated_at: now,
        };

        self.stores.notifications.insert(&notification).await?;

        if scheduled {
            tracing::info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                scheduled_for = ?notification.scheduled_for,
                "Notification scheduled"
            );
            return Ok(SendOutcome {
                notification_id: notification.id,
                status: NotificationStatus::Pending,
                scheduled: true,
                channels: Vec::new(),
            });
        }

        self.process(&notification).await
    }

    /// Immediate-send path for a notification already in `processing`.
    ///
    /// Channels that already have a Delivery (from an interrupted earlier
    /// run) are reported from their stored state instead of being resent.
    pub async fn process(&self, notification: &Notification) -> Result<SendOutcome, AppError> {
        let existing = self
            .stores
            .deliveries
            .find_by_notification(notification.id)
            .await?;

        let pending: Vec<ChannelKind> = notification
            .channels
            .iter()
            .copied()
            .filter(|channel| !existing.iter().any(|d| d.channel == *channel))
            .collect();

        if !existing.is_empty() {
            tracing::info!(
                notification_id = %notification.id,
                already_delivered = existing.len(),
                remaining = pending.len(),
                "Resuming partially processed notification"
            );
        }

        let attempts = pending
            .iter()
            .map(|channel| self.deliver_channel(notification, *channel));
        let fresh = join_all(attempts)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, AppError>>()?;

        let mut channels: Vec<ChannelResult> = existing.iter().map(ChannelResult::from_delivery).collect();
        channels.extend(fresh);

        let status = if channels.iter().any(|c| c.success) {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        let updated = self
            .stores
            .notifications
            .update_status(notification.id, NotificationStatus::Processing, status)
            .await?;
        if !updated {
            tracing::warn!(
                notification_id = %notification.id,
                status = %status,
                "Notification left processing before completion; status not updated"
            );
        }

        tracing::info!(
            notification_id = %notification.id,
            status = %status,
            channels = channels.len(),
            succeeded = channels.iter().filter(|c| c.success).count(),
            "Notification processed"
        );

        Ok(SendOutcome {
            notification_id: notification.id,
            status,
            scheduled: false,
            channels,
        })
    }

    /// Re-run one channel's provider chain for a delivery the caller has
    /// already claimed (`failed → pending` in the repository). `delivery` is
    /// the snapshot read before the claim.
    ///
    /// Returns the delivery as persisted after the attempt. The
    /// notification's own status is left untouched.
    pub async fn retry_delivery(
        &self,
        notification: &Notification,
        mut delivery: Delivery,
    ) -> Result<Delivery, AppError> {
        let now = Utc::now();
        if delivery.status != DeliveryStatus::Pending {
            self.tracker.begin_retry(&mut delivery, now)?;
        }

        let outcome = self.attempt_channel(notification, delivery.channel).await;
        self.tracker
            .record_attempt(&mut delivery, &outcome, Utc::now())?;
        self.stores.deliveries.save_attempt(&delivery).await?;
        self.record_analytics(&delivery).await;

        if delivery.is_terminal_failure() {
            tracing::warn!(
                notification_id = %notification.id,
                delivery_id = %delivery.id,
                channel = %delivery.channel,
                attempts = delivery.attempt_count,
                error = delivery.last_error.as_deref().unwrap_or_default(),
                "Delivery permanently failed"
            );
        }

        Ok(delivery)
    }

    async fn resolve_content(
        &self,
        request: &SendRequest,
    ) -> Result<(Option<String>, String), AppError> {
        if let Some(slug) = &request.template_slug {
            let template = self
                .stores
                .templates
                .find_by_slug(slug)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Template '{}' not found", slug)))?;
            let rendered = render_template(&template, &request.template_params);
            return Ok((rendered.title.or_else(|| request.title.clone()), rendered.body));
        }

        if request.message.trim().is_empty() {
            return Err(AppError::Validation("Message must not be empty".to_string()));
        }
        Ok((request.title.clone(), request.message.clone()))
    }

    async fn deliver_channel(
        &self,
        notification: &Notification,
        channel: ChannelKind,
    ) -> Result<ChannelResult, AppError> {
        let outcome = self.attempt_channel(notification, channel).await;
        let delivery = self
            .tracker
            .first_attempt(notification.id, channel, &outcome, Utc::now());

        self.stores.deliveries.insert(&delivery).await?;
        self.record_analytics(&delivery).await;

        Ok(ChannelResult::from_delivery(&delivery))
    }

    /// Walk the channel's providers in priority order until one succeeds.
    ///
    /// The outcome is retryable if any provider failed transiently; it is
    /// terminal only when every provider rejected the message or no provider
    /// exists for the channel.
    async fn attempt_channel(&self, notification: &Notification, channel: ChannelKind) -> AttemptOutcome {
        let providers = match self.registry.resolve(channel) {
            Ok(providers) => providers,
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    channel = %channel,
                    "No provider available for channel"
                );
                return AttemptOutcome::Failed {
                    provider_id: None,
                    error: e.to_string(),
                    retryable: false,
                };
            }
        };

        let recipient = Recipient {
            user_id: notification.user_id,
            address: notification.address_for(channel),
        };
        let content = MessageContent {
            title: notification.title.clone(),
            body: notification.message.clone(),
            priority: notification.priority,
            data: notification.data.clone(),
        };

        let mut errors = Vec::new();
        let mut retryable = false;
        let mut last_provider = None;

        for provider in providers {
            let sent = tokio::time::timeout(
                self.provider_timeout,
                provider.send(&recipient, &content, &notification.metadata),
            )
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.provider_timeout)));

            match sent {
                Ok(receipt) => {
                    tracing::info!(
                        notification_id = %notification.id,
                        channel = %channel,
                        provider = provider.id(),
                        provider_message_id = receipt.provider_message_id.as_deref().unwrap_or_default(),
                        "Channel delivered"
                    );
                    return AttemptOutcome::Delivered {
                        provider_id: provider.id().to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        channel = %channel,
                        provider = provider.id(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Provider attempt failed"
                    );
                    retryable |= e.is_retryable();
                    errors.push(format!("{}: {}", provider.id(), e));
                    last_provider = Some(provider.id().to_string());
                }
            }
        }

        AttemptOutcome::Failed {
            provider_id: last_provider,
            error: errors.join("; "),
            retryable,
        }
    }

    async fn record_analytics(&self, delivery: &Delivery) {
        let event = match delivery.status {
            DeliveryStatus::Sent => AnalyticsEvent::Sent,
            _ => AnalyticsEvent::Failed,
        };
        let record = AnalyticsRecord {
            id: Uuid::new_v4(),
            notification_id: delivery.notification_id,
            channel: delivery.channel,
            provider_id: delivery.provider_id.clone(),
            event,
            created_at: Utc::now(),
        };

        if let Err(e) = self.stores.analytics.record(&record).await {
            tracing::warn!(
                notification_id = %delivery.notification_id,
                channel = %delivery.channel,
                error = %e,
                "Failed to record analytics event"
            );
        }
    }
}

/// Drop repeated channels, keeping the first occurrence's position.
fn dedup_channels(channels: &[ChannelKind]) -> Vec<ChannelKind> {
    let mut unique = Vec::with_capacity(channels.len());
    for channel in channels {
        if !unique.contains(channel) {
            unique.push(*channel);
        }
    }
    unique
}

fn object_or_empty(value: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::json!({})
    } else {
        value
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use herald_common::types::NotificationTemplate;
    use herald_providers::{Provider, ProviderReceipt};

    use crate::store::memory::MemoryStore;

    /// Provider that replays a script of outcomes, then repeats the last one.
    pub(crate) struct ScriptedProvider {
        id: &'static str,
        channel: ChannelKind,
        script: Mutex<VecDeque<Result<(), ProviderError>>>,
        delay: Option<Duration>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new(
            id: &'static str,
            channel: ChannelKind,
            script: Vec<Result<(), ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                channel,
                script: Mutex::new(script.into()),
                delay: None,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn ok(id: &'static str, channel: ChannelKind) -> Arc<Self> {
            Self::new(id, channel, vec![Ok(())])
        }

        fn slow(id: &'static str, channel: ChannelKind, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                channel,
                script: Mutex::new(vec![Ok(())].into()),
                delay: Some(delay),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn channel(&self) -> ChannelKind {
            self.channel
        }

        async fn send(
            &self,
            _recipient: &Recipient,
            _content: &MessageContent,
            _metadata: &serde_json::Value,
        ) -> Result<ProviderReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            next.unwrap_or(Ok(())).map(|_| ProviderReceipt::default())
        }
    }

    pub(crate) fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            jitter: false,
        }
    }

    pub(crate) fn dispatcher(
        providers: Vec<(Arc<ScriptedProvider>, u32)>,
    ) -> (Dispatcher, MemoryStore) {
        let mut registry = ProviderRegistry::new();
        for (provider, priority) in providers {
            let channel = provider.channel;
            registry.register(channel, provider, priority, true).unwrap();
        }
        let (stores, memory) = Stores::in_memory();
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            stores,
            policy(),
            Duration::from_millis(200),
        );
        (dispatcher, memory)
    }

    pub(crate) fn request(channels: Vec<ChannelKind>) -> SendRequest {
        SendRequest {
            user_id: Uuid::new_v4(),
            notification_type: "order_shipped".to_string(),
            message: "Your order is on its way".to_string(),
            channels,
            title: Some("Shipped".to_string()),
            template_slug: None,
            template_params: serde_json::Value::Null,
            data: serde_json::json!({"order_id": 42}),
            scheduled_for: None,
            priority: Priority::Normal,
            metadata: serde_json::json!({
                "email": "ada@example.com",
                "phone": "+15550100",
                "webhook_url": "https://hooks.example.com/x"
            }),
        }
    }

    #[tokio::test]
    async fn test_partial_success_with_unresolvable_channel() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let (dispatcher, store) = dispatcher(vec![(email.clone(), 10)]);

        let outcome = dispatcher
            .send(request(vec![ChannelKind::Email, ChannelKind::Sms]))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert!(!outcome.scheduled);
        assert_eq!(outcome.channels.len(), 2);

        let email_result = outcome.channels.iter().find(|c| c.channel == ChannelKind::Email).unwrap();
        assert!(email_result.success);
        assert_eq!(email_result.provider_id.as_deref(), Some("resend"));

        let sms_result = outcome.channels.iter().find(|c| c.channel == ChannelKind::Sms).unwrap();
        assert!(!sms_result.success);
        assert_eq!(sms_result.error.as_deref(), Some("no provider available"));

        let deliveries = store.deliveries_for(outcome.notification_id).await;
        assert_eq!(deliveries.len(), 2);
        let sms = deliveries.iter().find(|d| d.channel == ChannelKind::Sms).unwrap();
        assert_eq!(sms.status, DeliveryStatus::Failed);
        assert_eq!(sms.last_error.as_deref(), Some("no provider available"));
        assert!(sms.next_retry_at.is_none());
        assert!(deliveries.iter().all(|d| d.attempt_count == 1));

        let stored = store.notification(outcome.notification_id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(store.analytics_records().await.len(), 2);
        assert_eq!(email.calls(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let primary = ScriptedProvider::new(
            "resend",
            ChannelKind::Email,
            vec![Err(ProviderError::Transient("503".into()))],
        );
        let secondary = ScriptedProvider::ok("sendgrid", ChannelKind::Email);
        let (dispatcher, store) =
            dispatcher(vec![(secondary.clone(), 20), (primary.clone(), 10)]);

        let outcome = dispatcher.send(request(vec![ChannelKind::Email])).await.unwrap();

        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(outcome.channels[0].provider_id.as_deref(), Some("sendgrid"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);

        let deliveries = store.deliveries_for(outcome.notification_id).await;
        assert_eq!(deliveries[0].provider_id.as_deref(), Some("sendgrid"));
        assert_eq!(deliveries[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_all_channels_fail_marks_notification_failed() {
        let email = ScriptedProvider::new(
            "resend",
            ChannelKind::Email,
            vec![Err(ProviderError::Transient("connection reset".into()))],
        );
        let (dispatcher, store) = dispatcher(vec![(email, 10)]);

        let before = Utc::now();
        let outcome = dispatcher.send(request(vec![ChannelKind::Email])).await.unwrap();
        assert_eq!(outcome.status, NotificationStatus::Failed);
        assert!(!outcome.any_succeeded());

        let delivery = &store.deliveries_for(outcome.notification_id).await[0];
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        let retry_at = delivery.next_retry_at.unwrap();
        assert!(retry_at >= before + chrono::Duration::seconds(60));
        assert!(delivery.last_error.as_deref().unwrap().contains("connection reset"));

        let analytics = store.analytics_records().await;
        assert_eq!(analytics.len(), 1);
        assert_eq!(analytics[0].event, AnalyticsEvent::Failed);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let sms = ScriptedProvider::new(
            "twilio",
            ChannelKind::Sms,
            vec![Err(ProviderError::Rejected("invalid phone number".into()))],
        );
        let (dispatcher, store) = dispatcher(vec![(sms, 10)]);

        let outcome = dispatcher.send(request(vec![ChannelKind::Sms])).await.unwrap();
        let delivery = &store.deliveries_for(outcome.notification_id).await[0];
        assert!(delivery.is_terminal_failure());
        assert_eq!(delivery.provider_id.as_deref(), Some("twilio"));
    }

    #[tokio::test]
    async fn test_future_schedule_is_persisted_without_sending() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let (dispatcher, store) = dispatcher(vec![(email.clone(), 10)]);

        let mut req = request(vec![ChannelKind::Email]);
        req.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
        let outcome = dispatcher.send(req).await.unwrap();

        assert!(outcome.scheduled);
        assert_eq!(outcome.status, NotificationStatus::Pending);
        assert!(outcome.channels.is_empty());
        assert_eq!(email.calls(), 0);
        assert!(store.deliveries_for(outcome.notification_id).await.is_empty());
        assert_eq!(
            store.notification(outcome.notification_id).await.unwrap().status,
            NotificationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_past_schedule_sends_immediately() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let (dispatcher, _store) = dispatcher(vec![(email.clone(), 10)]);

        let mut req = request(vec![ChannelKind::Email]);
        req.scheduled_for = Some(Utc::now() - chrono::Duration::minutes(1));
        let outcome = dispatcher.send(req).await.unwrap();

        assert!(!outcome.scheduled);
        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(email.calls(), 1);
    }

    #[tokio::test]
    async fn test_channel_validation_and_dedup() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let (dispatcher, store) = dispatcher(vec![(email.clone(), 10)]);

        let err = dispatcher.send(request(vec![])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let outcome = dispatcher
            .send(request(vec![ChannelKind::Email, ChannelKind::Email]))
            .await
            .unwrap();
        assert_eq!(outcome.channels.len(), 1);
        assert_eq!(email.calls(), 1);
        let stored = store.notification(outcome.notification_id).await.unwrap();
        assert_eq!(stored.channels, vec![ChannelKind::Email]);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_template() {
        let (dispatcher, store) = dispatcher(vec![]);
        let mut req = request(vec![ChannelKind::Email]);
        req.message = "   ".to_string();

        let err = dispatcher.send(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.counts().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn test_template_rendering() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let (dispatcher, store) = dispatcher(vec![(email, 10)]);
        store
            .put_template(NotificationTemplate {
                slug: "order_shipped".to_string(),
                title_template: Some("Order {{order_id}} shipped".to_string()),
                body_template: "Hi {{name}}, tracking {{tracking}}".to_string(),
                created_at: Utc::now(),
            })
            .await;

        let mut req = request(vec![ChannelKind::Email]);
        req.message = String::new();
        req.template_slug = Some("order_shipped".to_string());
        req.template_params = serde_json::json!({"order_id": 42, "name": "Ada", "tracking": "ZX9"});

        let outcome = dispatcher.send(req).await.unwrap();
        let stored = store.notification(outcome.notification_id).await.unwrap();
        assert_eq!(stored.title.as_deref(), Some("Order 42 shipped"));
        assert_eq!(stored.message, "Hi Ada, tracking ZX9");

        let mut missing = request(vec![ChannelKind::Email]);
        missing.template_slug = Some("nope".to_string());
        let err = dispatcher.send(missing).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_as_transient() {
        let slow = ScriptedProvider::slow("resend", ChannelKind::Email, Duration::from_secs(5));
        let (dispatcher, store) = dispatcher(vec![(slow, 10)]);

        let outcome = dispatcher.send(request(vec![ChannelKind::Email])).await.unwrap();
        assert_eq!(outcome.status, NotificationStatus::Failed);

        let delivery = &store.deliveries_for(outcome.notification_id).await[0];
        assert!(delivery.last_error.as_deref().unwrap().contains("timed out"));
        assert!(delivery.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn test_channels_fail_independently() {
        let email = ScriptedProvider::new(
            "resend",
            ChannelKind::Email,
            vec![Err(ProviderError::Transient("503".into()))],
        );
        let webhook = ScriptedProvider::ok("webhook", ChannelKind::Webhook);
        let (dispatcher, _store) = dispatcher(vec![(email, 10), (webhook, 10)]);

        let outcome = dispatcher
            .send(request(vec![ChannelKind::Email, ChannelKind::Webhook]))
            .await
            .unwrap();
        assert_eq!(outcome.status, NotificationStatus::Sent);
        let successes: Vec<bool> = outcome.channels.iter().map(|c| c.success).collect();
        assert_eq!(successes, vec![false, true]);
    }

    #[tokio::test]
    async fn test_email_delivered_while_push_fails() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let push = ScriptedProvider::new(
            "fcm",
            ChannelKind::Push,
            vec![Err(ProviderError::Transient("fcm unavailable".into()))],
        );
        let (dispatcher, store) = dispatcher(vec![(email.clone(), 10), (push.clone(), 10)]);

        let outcome = dispatcher
            .send(request(vec![ChannelKind::Email, ChannelKind::Push]))
            .await
            .unwrap();

        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(email.calls(), 1);
        assert_eq!(push.calls(), 1);

        let deliveries = store.deliveries_for(outcome.notification_id).await;
        assert_eq!(deliveries.len(), 2);
        let email_delivery = deliveries.iter().find(|d| d.channel == ChannelKind::Email).unwrap();
        assert_eq!(email_delivery.status, DeliveryStatus::Sent);
        assert_eq!(email_delivery.provider_id.as_deref(), Some("resend"));

        let push_delivery = deliveries.iter().find(|d| d.channel == ChannelKind::Push).unwrap();
        assert_eq!(push_delivery.status, DeliveryStatus::Failed);
        assert_eq!(push_delivery.provider_id.as_deref(), Some("fcm"));
        assert!(push_delivery.next_retry_at.is_some());
        assert!(push_delivery.last_error.as_deref().unwrap().contains("fcm unavailable"));

        let events: Vec<AnalyticsEvent> =
            store.analytics_records().await.iter().map(|r| r.event).collect();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&AnalyticsEvent::Sent));
        assert!(events.contains(&AnalyticsEvent::Failed));
    }

    #[tokio::test]
    async fn test_one_delivery_per_requested_channel() {
        use ChannelKind::*;
        let cases = [
            vec![Email, Push, Sms, Webhook, InApp],
            vec![Email, Push, Email, Sms, Webhook, InApp, InApp, Push],
            vec![Push, Push, Push],
            vec![Sms, Email],
        ];

        for channels in cases {
            let (dispatcher, store) = dispatcher(vec![
                (ScriptedProvider::ok("resend", Email), 10),
                (ScriptedProvider::ok("fcm", Push), 10),
                (ScriptedProvider::ok("twilio", Sms), 10),
                (ScriptedProvider::ok("webhook", Webhook), 10),
                (ScriptedProvider::ok("in_app", InApp), 10),
            ]);

            let outcome = dispatcher.send(request(channels.clone())).await.unwrap();
            let deliveries = store.deliveries_for(outcome.notification_id).await;

            let mut unique: Vec<ChannelKind> = Vec::new();
            for channel in channels {
                if !unique.contains(&channel) {
                    unique.push(channel);
                }
            }

            assert_eq!(deliveries.len(), unique.len(), "channels {unique:?}");
            assert_eq!(outcome.channels.len(), unique.len());
            for channel in &unique {
                let count = deliveries.iter().filter(|d| d.channel == *channel).count();
                assert_eq!(count, 1, "{channel} should have exactly one delivery");
            }
        }
    }

    #[tokio::test]
    async fn test_process_skips_channels_with_existing_delivery() {
        let email = ScriptedProvider::ok("resend", ChannelKind::Email);
        let push = ScriptedProvider::ok("fcm", ChannelKind::Push);
        let (dispatcher, store) = dispatcher(vec![(email.clone(), 10), (push.clone(), 10)]);

        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            notification_type: "digest".to_string(),
            title: None,
            message: "Weekly digest".to_string(),
            channels: vec![ChannelKind::Email, ChannelKind::Push],
            priority: Priority::Low,
            scheduled_for: None,
            data: serde_json::json!({}),
            metadata: serde_json::json!({"email": "a@example.com", "device_token": "tok"}),
            status: NotificationStatus::Processing,
            created_at: now,
            updated_at: now,
        };
        store.put_notification(notification.clone()).await;
        let earlier = dispatcher.tracker.first_attempt(
            notification.id,
            ChannelKind::Email,
            &AttemptOutcome::Delivered {
                provider_id: "resend".to_string(),
            },
            now,
        );
        store.put_delivery(earlier).await;

        let outcome = dispatcher.process(&notification).await.unwrap();
        assert_eq!(outcome.status, NotificationStatus::Sent);
        assert_eq!(outcome.channels.len(), 2);
        assert_eq!(email.calls(), 0);
        assert_eq!(push.calls(), 1);
        assert_eq!(store.deliveries_for(notification.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_delivery_success_keeps_notification_status() {
        let email = ScriptedProvider::new(
            "resend",
            ChannelKind::Email,
            vec![Err(ProviderError::Transient("503".into())), Ok(())],
        );
        let (dispatcher, store) = dispatcher(vec![(email, 10)]);

        let outcome = dispatcher.send(request(vec![ChannelKind::Email])).await.unwrap();
        assert_eq!(outcome.status, NotificationStatus::Failed);

        let notification = store.notification(outcome.notification_id).await.unwrap();
        let delivery = store.deliveries_for(notification.id).await.remove(0);
        let retried = dispatcher.retry_delivery(&notification, delivery).await.unwrap();

        assert_eq!(retried.status, DeliveryStatus::Sent);
        let stored = store.delivery(retried.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.attempt_count, 2);
        assert!(stored.next_retry_at.is_none());
        assert_eq!(
            store.notification(notification.id).await.unwrap().status,
            NotificationStatus::Failed
        );
    }

    #[test]
    fn test_dedup_preserves_first_occurrence() {
        let channels = [
            ChannelKind::Sms,
            ChannelKind::Email,
            ChannelKind::Sms,
            ChannelKind::InApp,
            ChannelKind::Email,
        ];
        assert_eq!(
            dedup_channels(&channels),
            vec![ChannelKind::Sms, ChannelKind::Email, ChannelKind::InApp]
        );
    }
}
