//! Seat inventory controller.
//!
//! Arbitrates exclusive, time-limited holds on the seats of a flight across
//! many concurrently active orders. A multi-seat hold is applied all-or-nothing
//! under the flight's lock, so no other order can observe half of it.

pub mod ledger;
pub mod memory;

pub use ledger::FlightLedger;
pub use memory::InMemoryInventory;

use altis_shared::{Seat, SeatId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Result of a successful hold or swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldReceipt {
    /// Seats now held by the order, deduplicated, in request order.
    pub seat_ids: Vec<SeatId>,
    /// Seats the same step gave back.
    pub released: Vec<SeatId>,
    pub total_nuc: i32,
    pub held_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("Seats unavailable: {unavailable:?}")]
    Conflict { unavailable: Vec<SeatId> },

    #[error("Seats not held by order: {seats:?}")]
    NotHeld { seats: Vec<SeatId> },

    #[error("Flight not found: {0}")]
    UnknownFlight(Uuid),

    #[error("Inventory storage failed: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SeatInventory: Send + Sync {
    /// Hold all of `seat_ids` for `order_id` until now + `ttl`, or none of them.
    async fn hold(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        seat_ids: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError>;

    /// Release `release` and hold `hold` in one serialized step. On conflict
    /// nothing changes.
    async fn swap(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        release: &[SeatId],
        hold: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError>;

    /// Idempotent. Seats not held by `order_id` are skipped without error.
    async fn release(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError>;

    /// Book seats currently held by `order_id`; `NotHeld` if any hold is missing.
    async fn commit(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError>;

    /// Clear lapsed holds on every flight. Returns how many seats were cleared.
    async fn sweep(&self) -> Result<usize, InventoryError>;

    /// Seat map with lapsed holds reported as available.
    async fn seats(&self, flight_id: Uuid) -> Result<Vec<Seat>, InventoryError>;

    async fn available_count(&self, flight_id: Uuid) -> Result<usize, InventoryError>;
}
