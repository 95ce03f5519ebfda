use altis_core::StoreError;
use altis_inventory::InventoryError;
use altis_shared::{Order, OrderStatus, SeatId};
use uuid::Uuid;

/// Business outcomes of a step that did not go the caller's way.
///
/// These are ordinary results of the state machine, reported inside a
/// `StepReport`, never as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Seats unavailable: {unavailable:?}")]
    Conflict { unavailable: Vec<SeatId> },

    #[error("Seat hold expired")]
    Expired,

    #[error("Seats no longer held by order: {seats:?}")]
    NotHeld { seats: Vec<SeatId> },

    #[error("Order is already {0}")]
    TerminalState(OrderStatus),

    #[error("Signal not accepted while order is {0}")]
    InvalidState(OrderStatus),

    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String, retryable: bool },
}

/// Operational failures, distinct from a business `Failed` order.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persisting order {order_id} failed: {source}")]
    Persistence {
        order_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("Order store unavailable: {0}")]
    Store(#[source] StoreError),

    #[error("Order actor stopped: {0}")]
    ActorStopped(Uuid),

    #[error("Seat inventory unavailable: {0}")]
    Inventory(InventoryError),
}

/// What one signal did to an order.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// The order after the step.
    pub order: Order,
    pub outcome: Result<(), BookingError>,
    /// The signal's dedupe key had already been applied; nothing changed.
    pub duplicate: bool,
}

impl StepReport {
    pub(crate) fn applied(order: &Order) -> Self {
        Self {
            order: order.clone(),
            outcome: Ok(()),
            duplicate: false,
        }
    }

    pub(crate) fn rejected(order: &Order, err: BookingError) -> Self {
        Self {
            order: order.clone(),
            outcome: Err(err),
            duplicate: false,
        }
    }

    pub(crate) fn duplicate(order: &Order) -> Self {
        Self {
            order: order.clone(),
            outcome: Ok(()),
            duplicate: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&BookingError> {
        self.outcome.as_ref().err()
    }
}
