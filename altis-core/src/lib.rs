pub mod clock;
pub mod notify;
pub mod payment;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use notify::NotificationSink;
pub use payment::{PaymentError, PaymentValidator, PaymentVerdict};
pub use repository::{OrderRepository, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
