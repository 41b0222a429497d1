//! Generic HTTP webhook: POSTs a JSON envelope to the recipient's URL.

use async_trait::async_trait;

use herald_common::config::WebhookConfig;
use herald_common::types::ChannelKind;

use crate::http::{check_response, transport_error};
use crate::{MessageContent, Provider, ProviderError, ProviderReceipt, Recipient};

pub struct WebhookProvider {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl WebhookProvider {
    pub fn new(client: reqwest::Client, config: &WebhookConfig) -> Self {
        Self {
            client,
            auth_token: config.auth_token.clone(),
        }
    }
}

fn parse_target(raw: &str) -> Result<reqwest::Url, ProviderError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ProviderError::Rejected(format!("invalid webhook URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProviderError::Rejected(format!(
            "unsupported webhook scheme '{other}'"
        ))),
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn id(&self) -> &str {
        "webhook"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let url = parse_target(recipient.require_address()?)?;

        let envelope = serde_json::json!({
            "user_id": recipient.user_id,
            "title": content.title,
            "body": content.body,
            "priority": content.priority,
            "data": content.data,
            "metadata": metadata,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut req = self.client.post(url).json(&envelope);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| transport_error("Webhook", e))?;
        check_response("Webhook", resp).await?;

        Ok(ProviderReceipt::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::config::ProviderToggle;
    use herald_common::types::Priority;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(auth_token: Option<&str>) -> WebhookProvider {
        let config = WebhookConfig {
            auth_token: auth_token.map(str::to_string),
            toggle: ProviderToggle {
                enabled: true,
                priority: 10,
            },
        };
        WebhookProvider::new(reqwest::Client::new(), &config)
    }

    fn content() -> MessageContent {
        MessageContent {
            title: None,
            body: "build finished".to_string(),
            priority: Priority::Low,
            data: serde_json::json!({"build": 7}),
        }
    }

    #[test]
    fn test_parse_target_rejects_bad_urls() {
        assert!(parse_target("https://hooks.example.com/x").is_ok());
        assert!(matches!(parse_target("not a url"), Err(ProviderError::Rejected(_))));
        assert!(matches!(parse_target("ftp://example.com"), Err(ProviderError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_webhook_posts_envelope_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("Authorization", "Bearer whk"))
            .and(body_partial_json(serde_json::json!({
                "body": "build finished",
                "data": {"build": 7},
                "metadata": {"source": "ci"}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let recipient = Recipient {
            user_id: Uuid::new_v4(),
            address: Some(format!("{}/hook", server.uri())),
        };
        provider(Some("whk"))
            .send(&recipient, &content(), &serde_json::json!({"source": "ci"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_gone_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let recipient = Recipient {
            user_id: Uuid::new_v4(),
            address: Some(server.uri()),
        };
        let err = provider(None)
            .send(&recipient, &content(), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
