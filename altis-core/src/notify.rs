use altis_shared::BookingEvent;
use async_trait::async_trait;

/// Receives change events for real-time fan-out.
///
/// The booking core only produces events; subscriber lifecycles belong to the sink.
/// Publishing is best effort and must not fail a state transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, events: Vec<BookingEvent>);
}
