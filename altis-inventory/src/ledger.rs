use altis_shared::{Flight, Seat, SeatId, SeatStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::{HoldReceipt, InventoryError};

/// Seat state for a single flight.
///
/// Every method takes `now` and applies lazy expiry: a hold whose `held_until`
/// has passed is treated as available whether or not a sweep has run.
#[derive(Debug, Clone)]
pub struct FlightLedger {
    flight: Flight,
    seats: BTreeMap<SeatId, Seat>,
}

impl FlightLedger {
    pub fn new(flight: Flight, seats: Vec<Seat>) -> Self {
        let seats = seats.into_iter().map(|seat| (seat.id.clone(), seat)).collect();
        Self { flight, seats }
    }

    pub fn flight(&self) -> &Flight {
        &self.flight
    }

    /// Seats that `order_id` could not take right now, in request order.
    ///
    /// Unknown seats count as unavailable.
    pub fn conflicts(&self, order_id: Uuid, seat_ids: &[SeatId], now: DateTime<Utc>) -> Vec<SeatId> {
        seat_ids
            .iter()
            .filter(|id| match self.seats.get(*id) {
                None => true,
                Some(seat) => match seat.effective_status(now) {
                    SeatStatus::Available => false,
                    SeatStatus::Held => seat.held_by_order != Some(order_id),
                    SeatStatus::Booked => true,
                },
            })
            .cloned()
            .collect()
    }

    /// Hold every seat in `seat_ids` for `order_id` until `until`, or none of them.
    ///
    /// Seats the order already holds are refreshed to the new `until`.
    pub fn hold(
        &mut self,
        order_id: Uuid,
        seat_ids: &[SeatId],
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<HoldReceipt, InventoryError> {
        self.swap(order_id, &[], seat_ids, until, now)
    }

    /// Release `release` and hold `hold` as one step.
    ///
    /// On conflict nothing changes, so the order keeps its previous hold. Seats in
    /// both sets stay held and are refreshed.
    pub fn swap(
        &mut self,
        order_id: Uuid,
        release: &[SeatId],
        hold: &[SeatId],
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<HoldReceipt, InventoryError> {
        let hold = dedup(hold);
        let unavailable = self.conflicts(order_id, &hold, now);
        if !unavailable.is_empty() {
            return Err(InventoryError::Conflict { unavailable });
        }

        let keep: HashSet<&SeatId> = hold.iter().collect();
        let mut released = Vec::new();
        for id in dedup(release) {
            if keep.contains(&id) {
                continue;
            }
            if let Some(seat) = self.seats.get_mut(&id) {
                if seat.status == SeatStatus::Held && seat.held_by_order == Some(order_id) {
                    seat.clear();
                    released.push(id);
                }
            }
        }

        let mut total_nuc = 0;
        for id in &hold {
            if let Some(seat) = self.seats.get_mut(id) {
                seat.hold(order_id, until);
                total_nuc += seat.price_nuc;
            }
        }

        Ok(HoldReceipt {
            seat_ids: hold,
            released,
            total_nuc,
            held_until: until,
        })
    }

    /// Clear holds owned by `order_id`. Seats held by anyone else, booked, or
    /// unknown are skipped silently. Returns the seats actually released.
    pub fn release(&mut self, order_id: Uuid, seat_ids: &[SeatId]) -> Vec<SeatId> {
        let mut released = Vec::new();
        for id in dedup(seat_ids) {
            if let Some(seat) = self.seats.get_mut(&id) {
                if seat.status == SeatStatus::Held && seat.held_by_order == Some(order_id) {
                    seat.clear();
                    released.push(id);
                }
            }
        }
        released
    }

    /// Turn live holds of `order_id` into bookings. All or nothing.
    ///
    /// Seats this order already booked are accepted again, so a replayed commit
    /// is harmless.
    pub fn commit(&mut self, order_id: Uuid, seat_ids: &[SeatId], now: DateTime<Utc>) -> Result<Vec<SeatId>, InventoryError> {
        let seat_ids = dedup(seat_ids);
        let missing: Vec<SeatId> = seat_ids
            .iter()
            .filter(|id| match self.seats.get(*id) {
                None => true,
                Some(seat) => !(seat.is_held_by(order_id, now) || seat.booked_by_order == Some(order_id)),
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(InventoryError::NotHeld { seats: missing });
        }

        for id in &seat_ids {
            if let Some(seat) = self.seats.get_mut(id) {
                if seat.status == SeatStatus::Held {
                    seat.book(order_id);
                }
            }
        }
        Ok(seat_ids)
    }

    /// Physically clear lapsed holds. Returns the cleared seats.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<SeatId> {
        let mut cleared = Vec::new();
        for seat in self.seats.values_mut() {
            if seat.is_hold_lapsed(now) {
                seat.clear();
                cleared.push(seat.id.clone());
            }
        }
        cleared
    }

    /// Seat map as observed at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<Seat> {
        self.seats
            .values()
            .map(|seat| {
                let mut seat = seat.clone();
                if seat.is_hold_lapsed(now) {
                    seat.clear();
                }
                seat
            })
            .collect()
    }

    /// Seats exactly as stored, lapsed holds included.
    pub fn raw_seats(&self) -> Vec<Seat> {
        self.seats.values().cloned().collect()
    }

    pub fn seat(&self, seat_id: &str, now: DateTime<Utc>) -> Option<Seat> {
        self.seats.get(seat_id).map(|seat| {
            let mut seat = seat.clone();
            if seat.is_hold_lapsed(now) {
                seat.clear();
            }
            seat
        })
    }

    pub fn available_count(&self, now: DateTime<Utc>) -> usize {
        self.seats
            .values()
            .filter(|seat| seat.effective_status(now) == SeatStatus::Available)
            .count()
    }
}

/// Drop repeated ids, keeping first occurrence order.
fn dedup(seat_ids: &[SeatId]) -> Vec<SeatId> {
    let mut seen = HashSet::new();
    seat_ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}
