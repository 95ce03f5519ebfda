use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Masked, SeatId};

/// How many signal dedupe keys an order remembers.
pub const APPLIED_SIGNAL_WINDOW: usize = 32;

/// Order status in the booking lifecycle
///
/// `AwaitingPayment` is part of the persisted vocabulary but the orchestrator
/// never enters it; seats-selected orders accept payment directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    SeatsSelected,
    AwaitingPayment,
    Processing,
    Confirmed,
    Failed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::SeatsSelected => "seats_selected",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Processing => "processing",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// States in which the order owns a live seat hold.
    pub fn has_active_hold(&self) -> bool {
        matches!(self, OrderStatus::SeatsSelected | OrderStatus::AwaitingPayment | OrderStatus::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "seats_selected" => Ok(OrderStatus::SeatsSelected),
            "awaiting_payment" => Ok(OrderStatus::AwaitingPayment),
            "processing" => Ok(OrderStatus::Processing),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: String,
    pub email: Masked<String>,
}

impl CustomerInfo {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: Masked(email.to_string()),
        }
    }
}

/// A customer's booking for seats on one flight.
///
/// Orders are never deleted. Once `status` is terminal the record is frozen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub flight_id: Uuid,
    pub customer: CustomerInfo,
    pub status: OrderStatus,
    pub seat_ids: Vec<SeatId>,
    pub total_nuc: i32,
    pub payment_attempts: u32,
    pub hold_expiry: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Most recent signal dedupe keys, oldest first.
    #[serde(default)]
    pub applied_signals: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(flight_id: Uuid, customer: CustomerInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flight_id,
            customer,
            status: OrderStatus::Pending,
            seat_ids: Vec::new(),
            total_nuc: 0,
            payment_attempts: 0,
            hold_expiry: None,
            failure_reason: None,
            applied_signals: Vec::new(),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the order claims a hold whose expiry has been reached.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status.has_active_hold() && self.hold_expiry.map_or(false, |expiry| expiry <= now)
    }

    /// Whole seconds left on the hold, zero when there is none.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.hold_expiry {
            Some(expiry) if self.status.has_active_hold() => (expiry - now).num_seconds().max(0),
            _ => 0,
        }
    }

    pub fn has_applied(&self, key: &str) -> bool {
        self.applied_signals.iter().any(|k| k == key)
    }

    /// Record a dedupe key, keeping only the most recent window.
    pub fn remember_signal(&mut self, key: &str) {
        if self.has_applied(key) {
            return;
        }
        self.applied_signals.push(key.to_string());
        if self.applied_signals.len() > APPLIED_SIGNAL_WINDOW {
            let overflow = self.applied_signals.len() - APPLIED_SIGNAL_WINDOW;
            self.applied_signals.drain(..overflow);
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
