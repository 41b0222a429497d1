//! Delivery providers: one capability-bound connector per channel, plus the
//! registry that orders competing providers for the same channel.

pub mod email;
pub mod http;
pub mod in_app;
pub mod push;
pub mod registry;
pub mod setup;
pub mod sms;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::types::{ChannelKind, Priority};

pub use registry::{ProviderRegistry, RegistryError};
pub use setup::build_registry;

/// Who a message is for. `address` is the channel-specific destination
/// (email address, device token, phone number, webhook URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Uuid,
    pub address: Option<String>,
}

impl Recipient {
    /// The address, or a `Rejected` error for channels that require one.
    pub fn require_address(&self) -> Result<&str, ProviderError> {
        self.address
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("missing recipient address".to_string()))
    }
}

/// Rendered message content handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    pub title: Option<String>,
    pub body: String,
    pub priority: Priority,
    pub data: serde_json::Value,
}

/// Successful send acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub provider_message_id: Option<String>,
}

/// Failure of a single send attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, 5xx, rate limit: worth retrying later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid recipient, unsupported payload, bad credentials: retrying won't help.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Rejected(_))
    }
}

/// A concrete integration able to deliver on exactly one channel.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier recorded on deliveries (e.g. "resend").
    fn id(&self) -> &str;

    /// The channel this provider serves.
    fn channel(&self) -> ChannelKind;

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id())
            .field("channel", &self.channel())
            .finish()
    }
}
