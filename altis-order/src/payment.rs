use altis_core::payment::validate_code;
use altis_core::{CoreError, PaymentError, PaymentValidator, PaymentVerdict};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BookingError;

/// Front door to the payment validator.
///
/// Malformed codes are rejected before the validator is called. Transport
/// errors and timeouts come back as retryable declines, so callers only ever
/// see a verdict.
#[derive(Clone)]
pub struct PaymentGateway {
    validator: Arc<dyn PaymentValidator>,
    timeout: Duration,
}

impl PaymentGateway {
    pub fn new(validator: Arc<dyn PaymentValidator>, timeout: Duration) -> Self {
        Self { validator, timeout }
    }

    pub fn check_code(&self, code: &str) -> Result<(), BookingError> {
        validate_code(code).map_err(|err| match err {
            CoreError::ValidationError(msg) | CoreError::InternalError(msg) => BookingError::Validation(msg),
        })
    }

    pub async fn authorize(&self, order_id: Uuid, code: &str, amount: i32) -> PaymentVerdict {
        match tokio::time::timeout(self.timeout, self.validator.validate(order_id, code, amount)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                warn!(%order_id, error = %err, "Payment validator failed");
                PaymentVerdict::declined(&err.to_string(), true)
            }
            Err(_) => {
                let err = PaymentError::Timeout(self.timeout.as_secs());
                warn!(%order_id, error = %err, "Payment validator timed out");
                PaymentVerdict::declined(&err.to_string(), true)
            }
        }
    }
}

/// Stand-in provider: answers after a random delay and approves most attempts.
/// Declines are always retryable.
pub struct SimulatedPaymentValidator {
    success_rate: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl Default for SimulatedPaymentValidator {
    fn default() -> Self {
        Self {
            success_rate: 0.85,
            min_latency: Duration::from_secs(1),
            max_latency: Duration::from_secs(3),
        }
    }
}

impl SimulatedPaymentValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min.min(max);
        self.max_latency = max.max(min);
        self
    }
}

#[async_trait]
impl PaymentValidator for SimulatedPaymentValidator {
    async fn validate(&self, order_id: Uuid, _code: &str, amount: i32) -> Result<PaymentVerdict, PaymentError> {
        let (latency, approved) = {
            let mut rng = rand::thread_rng();
            let latency = rng.gen_range(self.min_latency..=self.max_latency);
            (latency, rng.gen_bool(self.success_rate))
        };
        tokio::time::sleep(latency).await;

        debug!(%order_id, amount, approved, latency_ms = latency.as_millis() as u64, "Simulated payment answered");
        if approved {
            Ok(PaymentVerdict::Approved)
        } else {
            Ok(PaymentVerdict::declined("card declined by issuer", true))
        }
    }
}
