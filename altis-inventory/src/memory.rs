use altis_core::Clock;
use altis_shared::{Flight, Seat, SeatId};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{FlightLedger, HoldReceipt, InventoryError, SeatInventory};

/// In-process inventory sharded by flight.
///
/// The outer map lock is only taken to find a flight's ledger; each ledger has
/// its own mutex, so holds on different flights never contend.
pub struct InMemoryInventory {
    flights: RwLock<HashMap<Uuid, Arc<Mutex<FlightLedger>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryInventory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            flights: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Register a flight and its seats, replacing any previous ledger.
    pub async fn load_flight(&self, flight: Flight, seats: Vec<Seat>) {
        let flight_id = flight.id;
        let count = seats.len();
        let ledger = Arc::new(Mutex::new(FlightLedger::new(flight, seats)));
        self.flights.write().await.insert(flight_id, ledger);
        info!(%flight_id, seats = count, "Flight loaded into inventory");
    }

    async fn ledger(&self, flight_id: Uuid) -> Option<Arc<Mutex<FlightLedger>>> {
        self.flights.read().await.get(&flight_id).cloned()
    }

    async fn require(&self, flight_id: Uuid) -> Result<Arc<Mutex<FlightLedger>>, InventoryError> {
        self.ledger(flight_id).await.ok_or(InventoryError::UnknownFlight(flight_id))
    }
}

#[async_trait]
impl SeatInventory for InMemoryInventory {
    async fn hold(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        seat_ids: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError> {
        self.swap(order_id, flight_id, &[], seat_ids, ttl).await
    }

    async fn swap(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        release: &[SeatId],
        hold: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError> {
        let ledger = self.require(flight_id).await?;
        let mut ledger = ledger.lock().await;
        let now = self.clock.now();
        let receipt = ledger.swap(order_id, release, hold, now + ttl, now)?;
        debug!(%order_id, %flight_id, held = ?receipt.seat_ids, released = ?receipt.released, "Seats held");
        Ok(receipt)
    }

    async fn release(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError> {
        let Some(ledger) = self.ledger(flight_id).await else {
            return Ok(Vec::new());
        };
        let released = ledger.lock().await.release(order_id, seat_ids);
        debug!(%order_id, %flight_id, released = ?released, "Seats released");
        Ok(released)
    }

    async fn commit(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError> {
        let ledger = self.require(flight_id).await?;
        let mut ledger = ledger.lock().await;
        let booked = ledger.commit(order_id, seat_ids, self.clock.now())?;
        debug!(%order_id, %flight_id, booked = ?booked, "Seats booked");
        Ok(booked)
    }

    async fn sweep(&self) -> Result<usize, InventoryError> {
        let ledgers: Vec<_> = self.flights.read().await.values().cloned().collect();
        let now = self.clock.now();
        let mut cleared = 0;
        for ledger in ledgers {
            let mut ledger = ledger.lock().await;
            let seats = ledger.sweep(now);
            if !seats.is_empty() {
                debug!(flight_id = %ledger.flight().id, seats = ?seats, "Swept lapsed holds");
            }
            cleared += seats.len();
        }
        Ok(cleared)
    }

    async fn seats(&self, flight_id: Uuid) -> Result<Vec<Seat>, InventoryError> {
        let ledger = self.require(flight_id).await?;
        let ledger = ledger.lock().await;
        Ok(ledger.snapshot(self.clock.now()))
    }

    async fn available_count(&self, flight_id: Uuid) -> Result<usize, InventoryError> {
        let ledger = self.require(flight_id).await?;
        let ledger = ledger.lock().await;
        Ok(ledger.available_count(self.clock.now()))
    }
}
