pub mod models;
pub mod pii;

pub use models::events::{BookingEvent, EventType};
pub use models::flight::{Flight, Seat, SeatClass, SeatStatus};
pub use models::order::{CustomerInfo, Order, OrderStatus};
pub use pii::Masked;

/// Seats are addressed by their cabin label ("12C") within a flight.
pub type SeatId = String;
