use altis_core::NotificationSink;
use altis_order::BookingEngine;
use altis_shared::BookingEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Periodically clear lapsed seat holds until `shutdown` flips.
///
/// Holds are already expired lazily on every read, so a missed or failed sweep
/// only delays cleanup. Returns the total number of seats cleared.
pub async fn run_sweeper(engine: Arc<BookingEngine>, every: Duration, mut shutdown: watch::Receiver<bool>) -> usize {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total = 0;

    info!(interval_secs = every.as_secs(), "Expiry sweeper started");
    loop {
        tokio::select! {
            _ = ticker.tick() => match engine.sweep().await {
                Ok(0) => debug!("Sweep found no lapsed holds"),
                Ok(cleared) => {
                    total += cleared;
                    info!(cleared, "Lapsed seat holds cleared");
                }
                Err(e) => error!(error = %e, "Sweep failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
    info!(total, "Expiry sweeper stopped");
    total
}

/// Log every booking event and hand it to `forward`, if any.
///
/// Returns how many events were relayed.
pub async fn relay_events(
    rx: broadcast::Receiver<BookingEvent>,
    forward: Option<Arc<dyn NotificationSink>>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut stream = BroadcastStream::new(rx);
    let mut relayed = 0;

    loop {
        tokio::select! {
            biased;
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    info!(
                        event_type = event.event_type.as_str(),
                        flight_id = %event.flight_id,
                        order_id = ?event.order_id,
                        seats = ?event.seat_ids,
                        "Booking event"
                    );
                    if let Some(sink) = &forward {
                        sink.publish(vec![event]).await;
                    }
                    relayed += 1;
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Event relay lagged, events dropped");
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    relayed
}
