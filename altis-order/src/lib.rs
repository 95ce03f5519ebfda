//! Booking orchestration.
//!
//! Each active order is driven by its own actor task. Signals and the order's
//! hold-expiry timer are processed one at a time from that actor's queue, every
//! transition is persisted before its notifications are published, and a
//! restarted engine rehydrates actors from the order store.

pub mod actor;
pub mod error;
pub mod machine;
pub mod manager;
pub mod notify;
pub mod payment;
pub mod policy;
pub mod retry;
pub mod signal;

pub use actor::OrderHandle;
pub use error::{BookingError, EngineError, StepReport};
pub use machine::OrderMachine;
pub use manager::{BookingEngine, CreateOrder, OrderView};
pub use notify::{BroadcastSink, FlightSubscription};
pub use payment::{PaymentGateway, SimulatedPaymentValidator};
pub use policy::{BookingPolicy, MAX_PAYMENT_ATTEMPTS};
pub use retry::{retry_persist, RetryPolicy};
pub use signal::{Signal, SignalEnvelope};
