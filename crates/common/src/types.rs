use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    Sms,
    Webhook,
    InApp,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Email,
        ChannelKind::Push,
        ChannelKind::Sms,
        ChannelKind::Webhook,
        ChannelKind::InApp,
    ];

    /// Metadata key holding the recipient address for this channel.
    /// In-app messages are addressed by user id alone.
    pub fn address_key(&self) -> Option<&'static str> {
        match self {
            ChannelKind::Email => Some("email"),
            ChannelKind::Push => Some("device_token"),
            ChannelKind::Sms => Some("phone"),
            ChannelKind::Webhook => Some("webhook_url"),
            ChannelKind::InApp => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Push => write!(f, "push"),
            ChannelKind::Sms => write!(f, "sms"),
            ChannelKind::Webhook => write!(f, "webhook"),
            ChannelKind::InApp => write!(f, "in_app"),
        }
    }
}

/// Notification urgency, passed through to providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Notification lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl NotificationStatus {
    /// Forward-only lifecycle: pending → processing → {sent, failed}.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        matches!(
            (self, next),
            (NotificationStatus::Pending, NotificationStatus::Processing)
                | (NotificationStatus::Processing, NotificationStatus::Sent)
                | (NotificationStatus::Processing, NotificationStatus::Failed)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-channel delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// pending → {sent, failed}; failed → pending when a retry claims it.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (DeliveryStatus::Pending, DeliveryStatus::Sent)
                | (DeliveryStatus::Pending, DeliveryStatus::Failed)
                | (DeliveryStatus::Failed, DeliveryStatus::Pending)
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Analytics event kinds recorded per notification/channel/provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AnalyticsEvent {
    Sent,
    Failed,
    Opened,
    Clicked,
}

impl std::fmt::Display for AnalyticsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsEvent::Sent => write!(f, "sent"),
            AnalyticsEvent::Failed => write!(f, "failed"),
            AnalyticsEvent::Opened => write!(f, "opened"),
            AnalyticsEvent::Clicked => write!(f, "clicked"),
        }
    }
}

/// A logical message for one user, fanned out over `channels`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Free-form category tag (e.g. "order_shipped")
    pub notification_type: String,
    pub title: Option<String>,
    pub message: String,
    /// Never empty, no duplicates
    #[sqlx(json)]
    pub channels: Vec<ChannelKind>,
    pub priority: Priority,
    /// Absent = send immediately
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Structured payload handed to providers (push data, webhook body)
    pub data: serde_json::Value,
    /// Opaque key/value bag; also carries recipient addresses
    pub metadata: serde_json::Value,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Recipient address for `channel`, read from metadata.
    pub fn address_for(&self, channel: ChannelKind) -> Option<String> {
        let key = channel.address_key()?;
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

/// One channel-level delivery attempt record for a notification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: ChannelKind,
    /// Provider that served (or last attempted) the channel; `None` when no
    /// provider was available
    pub provider_id: Option<String>,
    pub status: DeliveryStatus,
    /// Always >= 1, only ever increases
    pub attempt_count: i32,
    pub last_error: Option<String>,
    /// Set only while failed with retries remaining
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Failed with no scheduled retry: excluded from all future retry scans.
    pub fn is_terminal_failure(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.next_retry_at.is_none()
    }
}

/// A single analytics row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnalyticsRecord {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: ChannelKind,
    pub provider_id: Option<String>,
    pub event: AnalyticsEvent,
    pub created_at: DateTime<Utc>,
}

/// A stored message template, rendered with `{{param}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationTemplate {
    pub slug: String,
    pub title_template: Option<String>,
    pub body_template: String,
    pub created_at: DateTime<Utc>,
}
