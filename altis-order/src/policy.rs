use altis_store::BusinessRules;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Hard ceiling on payment attempts per order. Configuration may lower it, never raise it.
pub const MAX_PAYMENT_ATTEMPTS: u32 = 3;

/// Timing and retry limits applied by every order actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Length of a seat hold, reset in full on every successful selection.
    pub hold_ttl: chrono::Duration,
    pub payment_timeout: Duration,
    pub max_payment_attempts: u32,
    pub persist_retry: RetryPolicy,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: chrono::Duration::minutes(15),
            payment_timeout: Duration::from_secs(10),
            max_payment_attempts: MAX_PAYMENT_ATTEMPTS,
            persist_retry: RetryPolicy::default(),
        }
    }
}

impl From<&BusinessRules> for BookingPolicy {
    fn from(rules: &BusinessRules) -> Self {
        // holds longer than a day are a misconfiguration
        let hold_seconds = rules.seat_hold_seconds.clamp(1, 86_400) as i64;
        Self {
            hold_ttl: chrono::Duration::seconds(hold_seconds),
            payment_timeout: Duration::from_secs(rules.payment_timeout_seconds.max(1)),
            max_payment_attempts: rules.max_payment_attempts.clamp(1, MAX_PAYMENT_ATTEMPTS),
            persist_retry: RetryPolicy {
                attempts: rules.persist_retry_attempts.max(1),
                base_delay: Duration::from_millis(rules.persist_retry_base_ms),
            },
        }
    }
}
