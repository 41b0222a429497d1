//! Email providers: Resend (primary) and SendGrid (fallback).

use async_trait::async_trait;
use serde::Deserialize;

use herald_common::config::{ResendConfig, SendGridConfig};
use herald_common::types::{ChannelKind, Priority};

use crate::http::{check_response, transport_error};
use crate::{MessageContent, Provider, ProviderError, ProviderReceipt, Recipient};

const RESEND_API_URL: &str = "https://api.resend.com";
const SENDGRID_API_URL: &str = "https://api.sendgrid.com";
const DEFAULT_SUBJECT: &str = "Notification";

fn subject(content: &MessageContent) -> &str {
    content.title.as_deref().unwrap_or(DEFAULT_SUBJECT)
}

/// Resend HTTP API (`POST /emails`).
pub struct ResendProvider {
    client: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

impl ResendProvider {
    pub fn new(client: reqwest::Client, config: &ResendConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            base_url: RESEND_API_URL.to_string(),
        }
    }

    /// Point the provider at a different API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for ResendProvider {
    fn id(&self) -> &str {
        "resend"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        _metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let to = recipient.require_address()?;

        let mut body = serde_json::json!({
            "from": self.from,
            "to": [to],
            "subject": subject(content),
            "text": content.body,
        });
        if content.priority == Priority::Urgent {
            body["headers"] = serde_json::json!({ "X-Priority": "1" });
        }

        let resp = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Resend", e))?;

        let resp = check_response("Resend", resp).await?;
        // Past a 2xx the email is accepted; a garbled body only costs us the id
        let message_id = match resp.json::<ResendResponse>().await {
            Ok(parsed) => parsed.id,
            Err(e) => {
                tracing::warn!(error = %e, "Resend accepted the email but the response was unreadable");
                None
            }
        };

        tracing::debug!(user_id = %recipient.user_id, "Email accepted by Resend");
        Ok(ProviderReceipt {
            provider_message_id: message_id,
        })
    }
}

/// SendGrid v3 mail API (`POST /v3/mail/send`).
pub struct SendGridProvider {
    client: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
}

impl SendGridProvider {
    pub fn new(client: reqwest::Client, config: &SendGridConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            base_url: SENDGRID_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for SendGridProvider {
    fn id(&self) -> &str {
        "sendgrid"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        _metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let to = recipient.require_address()?;

        let body = serde_json::json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from },
            "subject": subject(content),
            "content": [{ "type": "text/plain", "value": content.body }],
        });

        let resp = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("SendGrid", e))?;

        let resp = check_response("SendGrid", resp).await?;
        // SendGrid answers 202 with an empty body; the id travels in a header
        let message_id = resp
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ProviderReceipt {
            provider_message_id: message_id,
        })
    }
}
