use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Payment codes are exactly this many ASCII digits.
pub const PAYMENT_CODE_LENGTH: usize = 5;

/// Outcome reported by a payment provider for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentVerdict {
    Approved,
    Declined { retryable: bool, reason: String },
}

impl PaymentVerdict {
    pub fn declined(reason: &str, retryable: bool) -> Self {
        PaymentVerdict::Declined {
            retryable,
            reason: reason.to_string(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, PaymentVerdict::Approved)
    }
}

/// Transport-level failures. Callers treat every variant as retryable.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("payment provider did not answer within {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait PaymentValidator: Send + Sync {
    /// Validate one payment attempt for `amount` (NUC) against `code`.
    async fn validate(&self, order_id: Uuid, code: &str, amount: i32) -> Result<PaymentVerdict, PaymentError>;
}

/// Check the payment code format before anything is sent to a provider.
pub fn validate_code(code: &str) -> CoreResult<()> {
    if code.len() != PAYMENT_CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::ValidationError(format!(
            "payment code must be exactly {} digits",
            PAYMENT_CODE_LENGTH
        )));
    }
    Ok(())
}
