use altis_shared::SeatId;
use serde::{Deserialize, Serialize};

/// Inputs to an order's state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    SelectSeats { seat_ids: Vec<SeatId> },
    SubmitPayment { code: String },
    Cancel,
    /// Raised by the order's own timer.
    HoldExpired,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::SelectSeats { .. } => "select_seats",
            Signal::SubmitPayment { .. } => "submit_payment",
            Signal::Cancel => "cancel",
            Signal::HoldExpired => "hold_expired",
        }
    }
}

/// A signal plus the sender's dedupe key.
///
/// Redelivering an envelope with a key the order has already applied returns
/// the current order unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub signal: Signal,
}

impl SignalEnvelope {
    pub fn new(signal: Signal) -> Self {
        Self { key: None, signal }
    }

    pub fn with_key(signal: Signal, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            signal,
        }
    }
}

impl From<Signal> for SignalEnvelope {
    fn from(signal: Signal) -> Self {
        Self::new(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let envelope = SignalEnvelope::with_key(
            Signal::SelectSeats {
                seat_ids: vec!["1A".into()],
            },
            "req-1",
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"key": "req-1", "signal": {"type": "select_seats", "seat_ids": ["1A"]}})
        );

        let parsed: SignalEnvelope = serde_json::from_value(json!({"signal": {"type": "cancel"}})).unwrap();
        assert_eq!(parsed, SignalEnvelope::new(Signal::Cancel));
    }
}
