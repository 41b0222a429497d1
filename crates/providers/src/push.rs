//! Push notifications via Firebase Cloud Messaging (HTTP API, server key auth).

use async_trait::async_trait;
use serde::Deserialize;

use herald_common::config::FcmConfig;
use herald_common::types::{ChannelKind, Priority};

use crate::http::{check_response, transport_error};
use crate::{MessageContent, Provider, ProviderError, ProviderReceipt, Recipient};

const FCM_API_URL: &str = "https://fcm.googleapis.com";

/// Per-token errors FCM reports with a 200 status that will never succeed.
const PERMANENT_TOKEN_ERRORS: &[&str] = &[
    "NotRegistered",
    "InvalidRegistration",
    "MismatchSenderId",
    "MissingRegistration",
    "MessageTooBig",
    "InvalidDataKey",
];

pub struct FcmProvider {
    client: reqwest::Client,
    server_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    message_id: Option<String>,
    error: Option<String>,
}

impl FcmProvider {
    pub fn new(client: reqwest::Client, config: &FcmConfig) -> Self {
        Self {
            client,
            server_key: config.server_key.clone(),
            base_url: FCM_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for FcmProvider {
    fn id(&self) -> &str {
        "fcm"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        _metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let token = recipient.require_address()?;

        let priority = match content.priority {
            Priority::High | Priority::Urgent => "high",
            Priority::Low | Priority::Normal => "normal",
        };
        let body = serde_json::json!({
            "to": token,
            "priority": priority,
            "notification": {
                "title": content.title,
                "body": content.body,
            },
            "data": content.data,
        });

        let resp = self
            .client
            .post(format!("{}/fcm/send", self.base_url))
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("FCM", e))?;

        let resp = check_response("FCM", resp).await?;
        let parsed: FcmResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("FCM response unreadable: {e}")))?;

        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Transient("FCM returned no results".to_string()))?;

        match result.error {
            None => Ok(ProviderReceipt {
                provider_message_id: result.message_id,
            }),
            Some(code) if PERMANENT_TOKEN_ERRORS.contains(&code.as_str()) => {
                Err(ProviderError::Rejected(format!("FCM rejected token: {code}")))
            }
            Some(code) => Err(ProviderError::Transient(format!("FCM error: {code}"))),
        }
    }
}
