//! SMS via the Twilio Messages API.

use async_trait::async_trait;
use serde::Deserialize;

use herald_common::config::TwilioConfig;
use herald_common::types::ChannelKind;

use crate::http::{check_response, transport_error};
use crate::{MessageContent, Provider, ProviderError, ProviderReceipt, Recipient};

const TWILIO_API_URL: &str = "https://api.twilio.com";

pub struct TwilioProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: Option<String>,
}

impl TwilioProvider {
    pub fn new(client: reqwest::Client, config: &TwilioConfig) -> Self {
        Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            base_url: TWILIO_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// SMS has no subject line, so a title is folded into the text.
fn sms_text(content: &MessageContent) -> String {
    match &content.title {
        Some(title) if !title.is_empty() => format!("{}: {}", title, content.body),
        _ => content.body.clone(),
    }
}

#[async_trait]
impl Provider for TwilioProvider {
    fn id(&self) -> &str {
        "twilio"
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
        _metadata: &serde_json::Value,
    ) -> Result<ProviderReceipt, ProviderError> {
        let to = recipient.require_address()?;
        let text = sms_text(content);

        let resp = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url, self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", text.as_str())])
            .send()
            .await
            .map_err(|e| transport_error("Twilio", e))?;

        let resp = check_response("Twilio", resp).await?;
        let sid = match resp.json::<TwilioMessage>().await {
            Ok(message) => message.sid,
            Err(e) => {
                tracing::warn!(error = %e, "Twilio accepted the message but the response was unreadable");
                None
            }
        };

        Ok(ProviderReceipt {
            provider_message_id: sid,
        })
    }
}
