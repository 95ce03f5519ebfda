use altis_core::NotificationSink;
use altis_shared::BookingEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-process fan-out over a tokio broadcast channel.
///
/// Slow subscribers lose the oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<BookingEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.tx.subscribe()
    }

    /// Events for one flight only.
    pub fn subscribe_flight(&self, flight_id: Uuid) -> FlightSubscription {
        FlightSubscription {
            flight_id,
            rx: self.tx.subscribe(),
        }
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, events: Vec<BookingEvent>) {
        for event in events {
            if self.tx.send(event).is_err() {
                debug!("No subscribers for booking event");
            }
        }
    }
}

pub struct FlightSubscription {
    flight_id: Uuid,
    rx: broadcast::Receiver<BookingEvent>,
}

impl FlightSubscription {
    /// Next event for this flight, or `None` once the sink is gone.
    pub async fn recv(&mut self) -> Option<BookingEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.flight_id == self.flight_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(flight_id = %self.flight_id, skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
