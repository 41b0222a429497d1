//! In-app channel: appends to a per-user Redis inbox and publishes a live event.
//!
//! Inbox lists are capped at `INBOX_CAP` entries; older entries fall off.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use herald_common::types::ChannelKind;

use crate::{MessageContent, Provider, ProviderError, ProviderReceipt, Recipient};

const INBOX_CAP: isize = 100;
const EVENTS_CHANNEL: &str = "inapp:events";

pub struct InAppProvider {
    redis: ConnectionManager,
}

impl InAppProvider {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

fn inbox_key(user_id: Uuid) -> String {
    format!("inapp:{}", user_id)
}

fn inbox_entry(
    message_id: Uuid,
    recipient: &Recipient,
    content: &MessageContent,
    metadata: &serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "id": message_id,
        "user_id": recipient.user_id,
        "title": content.title,
        "body": content.body,
        "priority": content.priority,
        "data": content.data,
        "metadata": metadata,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "read": false,
    })
}

#[async_trait]
impl Provider for InAppProvider {
    fn id(&self) -> &str {
        "in_app"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let message_id = Uuid::new_v4();
        let key = inbox_key(recipient.user_id);
        let entry = inbox_entry(message_id, recipient, content, metadata).to_string();

        let mut conn = self.redis.clone();
        let written: redis::RedisResult<()> = redis::pipe()
            .atomic()
            .lpush(&key, &entry)
            .ignore()
            .ltrim(&key, 0, INBOX_CAP - 1)
            .ignore()
            .publish(EVENTS_CHANNEL, &entry)
            .ignore()
            .query_async(&mut conn)
            .await;
        written.map_err(|e| ProviderError::Transient(format!("Redis inbox write failed: {e}")))?;

        tracing::debug!(user_id = %recipient.user_id, %message_id, "In-app message stored");
        Ok(ProviderReceipt {
            provider_message_id: Some(message_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::types::Priority;

    #[test]
    fn test_inbox_key_is_per_user() {
        let user = Uuid::new_v4();
        assert_eq!(inbox_key(user), format!("inapp:{user}"));
    }

    #[test]
    fn test_inbox_entry_shape() {
        let recipient = Recipient {
            user_id: Uuid::new_v4(),
            address: None,
        };
        let content = MessageContent {
            title: Some("Welcome".to_string()),
            body: "Glad you're here".to_string(),
            priority: Priority::Urgent,
            data: serde_json::json!({"cta": "/start"}),
        };
        let id = Uuid::new_v4();
        let entry = inbox_entry(id, &recipient, &content, &serde_json::json!({"k": "v"}));

        assert_eq!(entry["id"], serde_json::json!(id));
        assert_eq!(entry["title"], "Welcome");
        assert_eq!(entry["priority"], "urgent");
        assert_eq!(entry["data"]["cta"], "/start");
        assert_eq!(entry["metadata"]["k"], "v");
        assert_eq!(entry["read"], false);
    }
}
