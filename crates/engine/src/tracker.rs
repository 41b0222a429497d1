//! Delivery State Tracker: the only place a `Delivery` changes state.
//!
//! ```text
//! pending ──► sent
//!    │
//!    └──► failed ──(retry claim)──► pending ──► sent | failed ...
//! ```
//!
//! `attempt_count` is incremented and `next_retry_at` recomputed here and
//! nowhere else. A failed delivery without `next_retry_at` is terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use herald_common::config::DeliveryConfig;
use herald_common::error::AppError;
use herald_common::types::{ChannelKind, Delivery, DeliveryStatus};

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included.
    pub max_attempts: i32,
    /// Delay after the first failed attempt. Doubles per attempt.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Add random jitter of [0, base_delay/2) to spread retries out.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
            jitter: true,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).max(0) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter never pushes the delay past the cap
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempt_count: i32) -> bool {
        attempt_count < self.max_attempts
    }
}

/// Final result of one pass through a channel's provider chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered {
        provider_id: String,
    },
    Failed {
        /// Last provider tried, `None` when no provider was available.
        provider_id: Option<String>,
        error: String,
        retryable: bool,
    },
}

pub struct DeliveryTracker {
    policy: RetryPolicy,
}

impl DeliveryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build the Delivery record for a channel's first attempt.
    pub fn first_attempt(
        &self,
        notification_id: Uuid,
        channel: ChannelKind,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Delivery {
        let mut delivery = Delivery {
            id: Uuid::new_v4(),
            notification_id,
            channel,
            provider_id: None,
            status: DeliveryStatus::Pending,
            attempt_count: 1,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        };
        self.apply(&mut delivery, outcome, now);
        delivery
    }

    /// failed → pending, taken when a retry claims the delivery.
    pub fn begin_retry(&self, delivery: &mut Delivery, now: DateTime<Utc>) -> Result<(), AppError> {
        if !delivery.status.can_transition_to(DeliveryStatus::Pending) {
            return Err(AppError::Validation(format!(
                "Delivery {} cannot be retried from status '{}'",
                delivery.id, delivery.status
            )));
        }
        delivery.status = DeliveryStatus::Pending;
        delivery.next_retry_at = None;
        delivery.updated_at = now;
        Ok(())
    }

    /// Apply the outcome of a retry attempt to a delivery in `pending`.
    pub fn record_attempt(
        &self,
        delivery: &mut Delivery,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::Validation(format!(
                "Delivery {} is '{}', expected 'pending'",
                delivery.id, delivery.status
            )));
        }
        delivery.attempt_count += 1;
        self.apply(delivery, outcome, now);
        Ok(())
    }

    fn apply(&self, delivery: &mut Delivery, outcome: &AttemptOutcome, now: DateTime<Utc>) {
        delivery.updated_at = now;
        match outcome {
            AttemptOutcome::Delivered { provider_id } => {
                delivery.status = DeliveryStatus::Sent;
                delivery.provider_id = Some(provider_id.clone());
                delivery.last_error = None;
                delivery.next_retry_at = None;
            }
            AttemptOutcome::Failed {
                provider_id,
                error,
                retryable,
            } => {
                delivery.status = DeliveryStatus::Failed;
                if provider_id.is_some() {
                    delivery.provider_id = provider_id.clone();
                }
                delivery.last_error = Some(error.clone());
                delivery.next_retry_at =
                    if *retryable && self.policy.has_attempts_left(delivery.attempt_count) {
                        let delay = self.policy.delay_for_attempt(delivery.attempt_count);
                        Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64))
                    } else {
                        None
                    };
            }
        }
    }
}
