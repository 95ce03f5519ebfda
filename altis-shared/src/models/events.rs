use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SeatId, SeatStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SeatsUpdated,
    SeatConflict,
    OrderCompleted,
    OrderExpired,
    SeatsReleased,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SeatsUpdated => "seats_updated",
            EventType::SeatConflict => "seat_conflict",
            EventType::OrderCompleted => "order_completed",
            EventType::OrderExpired => "order_expired",
            EventType::SeatsReleased => "seats_released",
        }
    }
}

/// Change notification handed to the fan-out sink, keyed by flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub flight_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub seat_ids: Vec<SeatId>,
    /// Resulting seat status; absent on conflicts, where nothing changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SeatStatus>,
    /// Epoch millis
    pub timestamp: i64,
}

impl BookingEvent {
    fn new(
        event_type: EventType,
        flight_id: Uuid,
        order_id: Uuid,
        seat_ids: Vec<SeatId>,
        status: Option<SeatStatus>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            flight_id,
            order_id: Some(order_id),
            seat_ids,
            status,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn seats_held(flight_id: Uuid, order_id: Uuid, seat_ids: Vec<SeatId>, at: DateTime<Utc>) -> Self {
        Self::new(EventType::SeatsUpdated, flight_id, order_id, seat_ids, Some(SeatStatus::Held), at)
    }

    pub fn seats_released(flight_id: Uuid, order_id: Uuid, seat_ids: Vec<SeatId>, at: DateTime<Utc>) -> Self {
        Self::new(EventType::SeatsReleased, flight_id, order_id, seat_ids, Some(SeatStatus::Available), at)
    }

    pub fn seat_conflict(flight_id: Uuid, order_id: Uuid, seat_ids: Vec<SeatId>, at: DateTime<Utc>) -> Self {
        Self::new(EventType::SeatConflict, flight_id, order_id, seat_ids, None, at)
    }

    pub fn order_completed(flight_id: Uuid, order_id: Uuid, seat_ids: Vec<SeatId>, at: DateTime<Utc>) -> Self {
        Self::new(EventType::OrderCompleted, flight_id, order_id, seat_ids, Some(SeatStatus::Booked), at)
    }

    pub fn order_expired(flight_id: Uuid, order_id: Uuid, seat_ids: Vec<SeatId>, at: DateTime<Utc>) -> Self {
        Self::new(EventType::OrderExpired, flight_id, order_id, seat_ids, Some(SeatStatus::Available), at)
    }
}
