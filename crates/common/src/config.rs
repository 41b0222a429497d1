use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string (in-app channel)
    pub redis_url: String,

    /// Background job timing and retention
    pub jobs: JobConfig,

    /// Delivery retry and provider call limits
    pub delivery: DeliveryConfig,

    /// Per-provider credentials, enablement and priority
    pub providers: ProvidersConfig,
}

/// Intervals, batch size and retention windows for the background jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Scheduler Job period in seconds (default: 60)
    pub scheduler_interval_secs: u64,
    /// Retry Job period in seconds (default: 300)
    pub retry_interval_secs: u64,
    /// Cleanup Job period in seconds (default: 3600)
    pub cleanup_interval_secs: u64,
    /// Notifications older than this are purged (default: 30)
    pub notification_retention_days: i64,
    /// Deliveries older than this are purged (default: 30)
    pub delivery_retention_days: i64,
    /// Analytics records older than this are purged (default: 90)
    pub analytics_retention_days: i64,
    /// Claimed records untouched for longer than this are reclaimed (default: 600)
    pub processing_lease_secs: u64,
    /// Maximum records handled per job cycle (default: 100)
    pub batch_size: i64,
}

/// Retry policy and provider call bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts after which a delivery is terminal-failed (default: 5)
    pub max_attempts: i32,
    /// First backoff interval in seconds (default: 60)
    pub retry_base_delay_secs: u64,
    /// Backoff cap in seconds (default: 3600)
    pub retry_max_delay_secs: u64,
    /// Timeout applied to every provider call in seconds (default: 10)
    pub provider_timeout_secs: u64,
}

/// Enablement and priority shared by every provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProviderToggle {
    pub enabled: bool,
    /// Lower number = tried first
    pub priority: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendConfig {
    pub api_key: String,
    pub from: String,
    pub toggle: ProviderToggle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from: String,
    pub toggle: ProviderToggle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    pub server_key: String,
    pub toggle: ProviderToggle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub toggle: ProviderToggle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Sent as a bearer token when present
    pub auth_token: Option<String>,
    pub toggle: ProviderToggle,
}

/// Provider configuration. `None` means the provider has no credentials and
/// is not constructed at all.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub resend: Option<ResendConfig>,
    pub sendgrid: Option<SendGridConfig>,
    pub fcm: Option<FcmConfig>,
    pub twilio: Option<TwilioConfig>,
    pub webhook: WebhookConfig,
    pub in_app: ProviderToggle,
}

impl JobConfig {
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn processing_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.processing_lease_secs as i64)
    }

    /// Reject values the job driver cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, secs) in [
            ("SCHEDULER_INTERVAL_SECS", self.scheduler_interval_secs),
            ("RETRY_INTERVAL_SECS", self.retry_interval_secs),
            ("CLEANUP_INTERVAL_SECS", self.cleanup_interval_secs),
            ("PROCESSING_LEASE_SECS", self.processing_lease_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.batch_size <= 0 {
            anyhow::bail!("JOB_BATCH_SIZE must be greater than zero");
        }
        for (name, days) in [
            ("NOTIFICATION_RETENTION_DAYS", self.notification_retention_days),
            ("DELIVERY_RETENTION_DAYS", self.delivery_retention_days),
            ("ANALYTICS_RETENTION_DAYS", self.analytics_retention_days),
        ] {
            if days < 0 {
                anyhow::bail!("{name} must not be negative");
            }
        }
        Ok(())
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: 60,
            retry_interval_secs: 300,
            cleanup_interval_secs: 3600,
            notification_retention_days: 30,
            delivery_retention_days: 30,
            analytics_retention_days: 90,
            processing_lease_secs: 600,
            batch_size: 100,
        }
    }
}

impl DeliveryConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts <= 0 {
            anyhow::bail!("MAX_DELIVERY_ATTEMPTS must be greater than zero");
        }
        if self.provider_timeout_secs == 0 {
            anyhow::bail!("PROVIDER_TIMEOUT_SECS must be greater than zero");
        }
        if self.retry_max_delay_secs < self.retry_base_delay_secs {
            anyhow::bail!("RETRY_MAX_DELAY_SECS must not be below RETRY_BASE_DELAY_SECS");
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay_secs: 60,
            retry_max_delay_secs: 3600,
            provider_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            jobs: JobConfig {
                scheduler_interval_secs: parse_var("SCHEDULER_INTERVAL_SECS", 60)?,
                retry_interval_secs: parse_var("RETRY_INTERVAL_SECS", 300)?,
                cleanup_interval_secs: parse_var("CLEANUP_INTERVAL_SECS", 3600)?,
                notification_retention_days: parse_var("NOTIFICATION_RETENTION_DAYS", 30)?,
                delivery_retention_days: parse_var("DELIVERY_RETENTION_DAYS", 30)?,
                analytics_retention_days: parse_var("ANALYTICS_RETENTION_DAYS", 90)?,
                processing_lease_secs: parse_var("PROCESSING_LEASE_SECS", 600)?,
                batch_size: parse_var("JOB_BATCH_SIZE", 100)?,
            },
            delivery: DeliveryConfig {
                max_attempts: parse_var("MAX_DELIVERY_ATTEMPTS", 5)?,
                retry_base_delay_secs: parse_var("RETRY_BASE_DELAY_SECS", 60)?,
                retry_max_delay_secs: parse_var("RETRY_MAX_DELAY_SECS", 3600)?,
                provider_timeout_secs: parse_var("PROVIDER_TIMEOUT_SECS", 10)?,
            },
            providers: ProvidersConfig::from_env()?,
        };
        config.jobs.validate()?;
        config.delivery.validate()?;

        Ok(config)
    }
}

impl ProvidersConfig {
    /// Read provider settings. A provider that is enabled (explicitly, or by
    /// default because some of its credentials are set) but lacks the rest of
    /// its credentials is a startup error.
    pub fn from_env() -> anyhow::Result<Self> {
        let email_from = std::env::var("EMAIL_FROM").ok();

        let resend = {
            let key = std::env::var("RESEND_API_KEY").ok();
            let toggle = toggle("RESEND", key.is_some(), 10)?;
            match (key, &email_from) {
                (Some(api_key), Some(from)) => Some(ResendConfig {
                    api_key,
                    from: from.clone(),
                    toggle,
                }),
                _ => require_absent("RESEND", toggle, "RESEND_API_KEY and EMAIL_FROM")?,
            }
        };

        let sendgrid = {
            let key = std::env::var("SENDGRID_API_KEY").ok();
            let toggle = toggle("SENDGRID", key.is_some(), 20)?;
            match (key, &email_from) {
                (Some(api_key), Some(from)) => Some(SendGridConfig {
                    api_key,
                    from: from.clone(),
                    toggle,
                }),
                _ => require_absent("SENDGRID", toggle, "SENDGRID_API_KEY and EMAIL_FROM")?,
            }
        };

        let fcm = {
            let key = std::env::var("FCM_SERVER_KEY").ok();
            let toggle = toggle("FCM", key.is_some(), 10)?;
            match key {
                Some(server_key) => Some(FcmConfig { server_key, toggle }),
                None => require_absent("FCM", toggle, "FCM_SERVER_KEY")?,
            }
        };

        let twilio = {
            let sid = std::env::var("TWILIO_ACCOUNT_SID").ok();
            let token = std::env::var("TWILIO_AUTH_TOKEN").ok();
            let from = std::env::var("TWILIO_FROM_NUMBER").ok();
            let toggle = toggle("TWILIO", sid.is_some() && token.is_some(), 10)?;
            match (sid, token, from) {
                (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                    account_sid,
                    auth_token,
                    from_number,
                    toggle,
                }),
                _ => require_absent(
                    "TWILIO",
                    toggle,
                    "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_FROM_NUMBER",
                )?,
            }
        };

        Ok(Self {
            resend,
            sendgrid,
            fcm,
            twilio,
            webhook: WebhookConfig {
                auth_token: std::env::var("WEBHOOK_AUTH_TOKEN").ok(),
                toggle: toggle("WEBHOOK", true, 10)?,
            },
            in_app: toggle("IN_APP", true, 10)?,
        })
    }
}

/// Read `<prefix>_ENABLED` and `<prefix>_PRIORITY`.
fn toggle(prefix: &str, default_enabled: bool, default_priority: u32) -> anyhow::Result<ProviderToggle> {
    let enabled_var = format!("{prefix}_ENABLED");
    let enabled = match std::env::var(&enabled_var) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| anyhow::anyhow!("{enabled_var} must be true or false"))?,
        Err(_) => default_enabled,
    };

    Ok(ProviderToggle {
        enabled,
        priority: parse_var(&format!("{prefix}_PRIORITY"), default_priority)?,
    })
}

/// Credentials are incomplete: fine unless the provider is enabled.
fn require_absent<T>(prefix: &str, toggle: ProviderToggle, needed: &str) -> anyhow::Result<Option<T>> {
    if toggle.enabled {
        anyhow::bail!(
            "{prefix} credentials incomplete: set {needed}, or set {prefix}_ENABLED=false"
        );
    }
    Ok(None)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
