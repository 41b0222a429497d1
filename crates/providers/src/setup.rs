//! Build the provider registry from configuration at process start.

use std::sync::Arc;

use redis::aio::ConnectionManager;

use herald_common::config::ProvidersConfig;
use herald_common::error::AppError;
use herald_common::types::ChannelKind;

use crate::email::{ResendProvider, SendGridProvider};
use crate::in_app::InAppProvider;
use crate::push::FcmProvider;
use crate::registry::ProviderRegistry;
use crate::sms::TwilioProvider;
use crate::webhook::WebhookProvider;

/// Construct every configured provider once and register it.
///
/// Providers without credentials were already dropped by config loading
/// (or rejected there if explicitly enabled). The in-app provider needs a
/// Redis connection when enabled.
pub fn build_registry(
    config: &ProvidersConfig,
    http: reqwest::Client,
    redis: Option<ConnectionManager>,
) -> Result<ProviderRegistry, AppError> {
    let mut registry = ProviderRegistry::new();

    if let Some(resend) = &config.resend {
        registry.register(
            ChannelKind::Email,
            Arc::new(ResendProvider::new(http.clone(), resend)),
            resend.toggle.priority,
            resend.toggle.enabled,
        )?;
    }

    if let Some(sendgrid) = &config.sendgrid {
        registry.register(
            ChannelKind::Email,
            Arc::new(SendGridProvider::new(http.clone(), sendgrid)),
            sendgrid.toggle.priority,
            sendgrid.toggle.enabled,
        )?;
    }

    if let Some(fcm) = &config.fcm {
        registry.register(
            ChannelKind::Push,
            Arc::new(FcmProvider::new(http.clone(), fcm)),
            fcm.toggle.priority,
            fcm.toggle.enabled,
        )?;
    }

    if let Some(twilio) = &config.twilio {
        registry.register(
            ChannelKind::Sms,
            Arc::new(TwilioProvider::new(http.clone(), twilio)),
            twilio.toggle.priority,
            twilio.toggle.enabled,
        )?;
    }

    registry.register(
        ChannelKind::Webhook,
        Arc::new(WebhookProvider::new(http, &config.webhook)),
        config.webhook.toggle.priority,
        config.webhook.toggle.enabled,
    )?;

    match (redis, config.in_app.enabled) {
        (Some(redis), enabled) => registry.register(
            ChannelKind::InApp,
            Arc::new(InAppProvider::new(redis)),
            config.in_app.priority,
            enabled,
        )?,
        (None, true) => {
            return Err(AppError::Config(
                "in-app provider is enabled but no Redis connection was supplied".to_string(),
            ));
        }
        (None, false) => {}
    }

    let channels = registry.channels();
    if channels.is_empty() {
        tracing::warn!("No delivery channel has an enabled provider");
    } else {
        tracing::info!(
            providers = registry.len(),
            channels = ?channels,
            "Provider registry ready"
        );
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::config::{
        ProviderToggle, ResendConfig, SendGridConfig, TwilioConfig, WebhookConfig,
    };

    fn toggle(enabled: bool, priority: u32) -> ProviderToggle {
        ProviderToggle { enabled, priority }
    }

    fn base_config() -> ProvidersConfig {
        ProvidersConfig {
            resend: None,
            sendgrid: None,
            fcm: None,
            twilio: None,
            webhook: WebhookConfig {
                auth_token: None,
                toggle: toggle(true, 10),
            },
            in_app: toggle(false, 10),
        }
    }

    #[test]
    fn test_email_fallback_order_from_config() {
        let mut config = base_config();
        config.resend = Some(ResendConfig {
            api_key: "re".into(),
            from: "a@example.com".into(),
            toggle: toggle(true, 10),
        });
        config.sendgrid = Some(SendGridConfig {
            api_key: "sg".into(),
            from: "a@example.com".into(),
            toggle: toggle(true, 20),
        });

        let registry = build_registry(&config, reqwest::Client::new(), None).unwrap();
        let email: Vec<String> = registry
            .resolve(ChannelKind::Email)
            .unwrap()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(email, vec!["resend", "sendgrid"]);
    }

    #[test]
    fn test_disabled_provider_is_registered_but_not_resolved() {
        let mut config = base_config();
        config.twilio = Some(TwilioConfig {
            account_sid: "AC".into(),
            auth_token: "t".into(),
            from_number: "+1".into(),
            toggle: toggle(false, 10),
        });

        let registry = build_registry(&config, reqwest::Client::new(), None).unwrap();
        assert!(registry.resolve(ChannelKind::Sms).is_err());
        assert_eq!(registry.channels(), vec![ChannelKind::Webhook]);
    }

    #[test]
    fn test_in_app_without_redis_fails_fast() {
        let mut config = base_config();
        config.in_app = toggle(true, 10);

        let result = build_registry(&config, reqwest::Client::new(), None);
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
