use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::SeatId;

/// A scheduled flight. Capacity is fixed once the flight is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub id: Uuid,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub total_seats: u32,
}

impl Flight {
    pub fn new(flight_number: &str, origin: &str, destination: &str, departure_time: DateTime<Utc>, total_seats: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            flight_number: flight_number.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure_time,
            total_seats,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeatClass {
    Economy,
    Business,
    First,
}

impl SeatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatClass::Economy => "economy",
            SeatClass::Business => "business",
            SeatClass::First => "first",
        }
    }
}

impl FromStr for SeatClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "economy" => Ok(SeatClass::Economy),
            "business" => Ok(SeatClass::Business),
            "first" => Ok(SeatClass::First),
            other => Err(format!("unknown seat class: {}", other)),
        }
    }
}

/// Persisted seat status. The strings are part of the storage and fan-out contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Held => "held",
            SeatStatus::Booked => "booked",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "held" => Ok(SeatStatus::Held),
            "booked" => Ok(SeatStatus::Booked),
            other => Err(format!("unknown seat status: {}", other)),
        }
    }
}

/// A seat on one flight.
///
/// `held_until` and `held_by_order` are present iff `status == Held`. Only the
/// inventory controller mutates the hold fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: SeatId,
    pub flight_id: Uuid,
    pub row: i32,
    pub column: String,
    pub class: SeatClass,
    pub price_nuc: i32,
    pub status: SeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by_order: Option<Uuid>,
    /// Order that bought the seat, kept for audit once booked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked_by_order: Option<Uuid>,
}

impl Seat {
    /// Create an available seat labelled `{row}{column}`.
    pub fn new(flight_id: Uuid, row: i32, column: &str, class: SeatClass, price_nuc: i32) -> Self {
        Self {
            id: format!("{}{}", row, column),
            flight_id,
            row,
            column: column.to_string(),
            class,
            price_nuc,
            status: SeatStatus::Available,
            held_until: None,
            held_by_order: None,
            booked_by_order: None,
        }
    }

    /// True when the seat is marked held but its hold has run out.
    pub fn is_hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held && self.held_until.map_or(true, |until| until <= now)
    }

    /// Status as observed at `now`, with lapsed holds reported as available.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SeatStatus {
        if self.is_hold_lapsed(now) {
            SeatStatus::Available
        } else {
            self.status
        }
    }

    /// True when `order_id` holds this seat and the hold is still live at `now`.
    pub fn is_held_by(&self, order_id: Uuid, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held && self.held_by_order == Some(order_id) && !self.is_hold_lapsed(now)
    }

    pub fn hold(&mut self, order_id: Uuid, until: DateTime<Utc>) {
        self.status = SeatStatus::Held;
        self.held_until = Some(until);
        self.held_by_order = Some(order_id);
    }

    pub fn clear(&mut self) {
        self.status = SeatStatus::Available;
        self.held_until = None;
        self.held_by_order = None;
    }

    pub fn book(&mut self, order_id: Uuid) {
        self.status = SeatStatus::Booked;
        self.held_until = None;
        self.held_by_order = None;
        self.booked_by_order = Some(order_id);
    }
}
