//! Provider registry: per-channel provider lists ordered by priority.
//!
//! Built once at process start and shared read-only (behind an `Arc`) with
//! the dispatcher. Ordering is ascending priority number with ties broken by
//! registration order, so resolution is deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use herald_common::error::AppError;
use herald_common::types::ChannelKind;

use crate::Provider;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No enabled provider for the channel. Reported per channel, never
    /// fatal to a whole send.
    #[error("no provider available")]
    NoProviderAvailable(ChannelKind),
}

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    priority: u32,
    enabled: bool,
}

/// Registry of delivery providers keyed by channel.
#[derive(Default)]
pub struct ProviderRegistry {
    channels: HashMap<ChannelKind, Vec<ProviderEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `channel`.
    ///
    /// Fails if the provider is bound to a different channel than the one it
    /// is being registered for.
    pub fn register(
        &mut self,
        channel: ChannelKind,
        provider: Arc<dyn Provider>,
        priority: u32,
        enabled: bool,
    ) -> Result<(), AppError> {
        if provider.channel() != channel {
            return Err(AppError::Config(format!(
                "provider '{}' serves {} and cannot be registered for {}",
                provider.id(),
                provider.channel(),
                channel
            )));
        }

        tracing::info!(
            provider = provider.id(),
            channel = %channel,
            priority,
            enabled,
            "Provider registered"
        );

        let entries = self.channels.entry(channel).or_default();
        entries.push(ProviderEntry {
            provider,
            priority,
            enabled,
        });
        // Stable sort keeps registration order among equal priorities
        entries.sort_by_key(|e| e.priority);
        Ok(())
    }

    /// Enabled providers for `channel`, best first.
    pub fn resolve(&self, channel: ChannelKind) -> Result<Vec<Arc<dyn Provider>>, RegistryError> {
        let providers: Vec<Arc<dyn Provider>> = self
            .channels
            .get(&channel)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.enabled)
                    .map(|e| Arc::clone(&e.provider))
                    .collect()
            })
            .unwrap_or_default();

        if providers.is_empty() {
            return Err(RegistryError::NoProviderAvailable(channel));
        }
        Ok(providers)
    }

    /// Channels with at least one enabled provider.
    pub fn channels(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .filter(|c| {
                self.channels
                    .get(c)
                    .is_some_and(|entries| entries.iter().any(|e| e.enabled))
            })
            .collect()
    }

    /// Total number of registered providers, enabled or not.
    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageContent, ProviderError, ProviderReceipt, Recipient};
    use async_trait::async_trait;

    struct NamedProvider {
        id: &'static str,
        channel: ChannelKind,
    }

    #[async_trait]
    impl Provider for NamedProvider {
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
            Ok(ProviderReceipt::default())
        }
    }

    fn provider(id: &'static str, channel: ChannelKind) -> Arc<dyn Provider> {
        Arc::new(NamedProvider { id, channel })
    }

    fn ids(providers: &[Arc<dyn Provider>]) -> Vec<String> {
        providers.iter().map(|p| p.id().to_string()).collect()
    }

    #[test]
    fn test_resolve_orders_by_priority() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ChannelKind::Email, provider("sendgrid", ChannelKind::Email), 20, true)
            .unwrap();
        registry
            .register(ChannelKind::Email, provider("resend", ChannelKind::Email), 10, true)
            .unwrap();

        let resolved = registry.resolve(ChannelKind::Email).unwrap();
        assert_eq!(ids(&resolved), vec!["resend", "sendgrid"]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let mut registry = ProviderRegistry::new();
        for id in ["first", "second", "third"] {
            registry
                .register(ChannelKind::Push, provider(id, ChannelKind::Push), 5, true)
                .unwrap();
        }
        registry
            .register(ChannelKind::Push, provider("urgent", ChannelKind::Push), 1, true)
            .unwrap();

        let resolved = registry.resolve(ChannelKind::Push).unwrap();
        assert_eq!(ids(&resolved), vec!["urgent", "first", "second", "third"]);
    }

    #[test]
    fn test_disabled_providers_are_skipped() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ChannelKind::Sms, provider("twilio", ChannelKind::Sms), 10, false)
            .unwrap();

        assert_eq!(
            registry.resolve(ChannelKind::Sms).unwrap_err(),
            RegistryError::NoProviderAvailable(ChannelKind::Sms)
        );
        assert!(registry.channels().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_channel_has_no_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve(ChannelKind::Webhook).unwrap_err();
        assert_eq!(err.to_string(), "no provider available");
    }

    #[test]
    fn test_register_rejects_channel_mismatch() {
        let mut registry = ProviderRegistry::new();
        let result =
            registry.register(ChannelKind::Sms, provider("resend", ChannelKind::Email), 10, true);
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_channels_lists_enabled_only() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ChannelKind::Email, provider("resend", ChannelKind::Email), 10, true)
            .unwrap();
        registry
            .register(ChannelKind::InApp, provider("in_app", ChannelKind::InApp), 10, true)
            .unwrap();
        registry
            .register(ChannelKind::Sms, provider("twilio", ChannelKind::Sms), 10, false)
            .unwrap();

        assert_eq!(registry.channels(), vec![ChannelKind::Email, ChannelKind::InApp]);
    }
}
