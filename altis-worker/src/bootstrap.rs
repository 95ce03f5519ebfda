use altis_core::{Clock, NotificationSink, OrderRepository, SystemClock};
use altis_inventory::{InMemoryInventory, SeatInventory};
use altis_order::{BookingEngine, BookingPolicy, BroadcastSink, OrderMachine, SimulatedPaymentValidator};
use altis_shared::{Flight, Seat, SeatClass};
use altis_store::{Config, DbClient, InMemoryOrderRepository, PgOrderRepository, PgSeatInventory};
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

const EVENT_BUFFER: usize = 1024;

/// Everything `main` needs once wiring is done.
pub struct Runtime {
    pub engine: Arc<BookingEngine>,
    pub events: BroadcastSink,
    /// Downstream sink the relay forwards to, when one is configured.
    pub forward: Option<Arc<dyn NotificationSink>>,
    pub sweep_interval: std::time::Duration,
}

pub async fn build(config: &Config) -> anyhow::Result<Runtime> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut rules = config.business_rules.clone();

    let (inventory, orders): (Arc<dyn SeatInventory>, Arc<dyn OrderRepository>) = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            rules = db
                .fetch_business_rules(rules)
                .await
                .context("Failed to load business rules")?;
            (
                Arc::new(PgSeatInventory::new(db.pool.clone(), clock.clone())),
                Arc::new(PgOrderRepository::new(db.pool.clone())),
            )
        }
        None => {
            warn!("No database configured, using in-memory stores");
            let inventory = InMemoryInventory::new(clock.clone());
            let flight = seed_demo_flight(&inventory).await;
            info!(flight_id = %flight.id, flight_number = %flight.flight_number, "Demo flight ready");
            (Arc::new(inventory), Arc::new(InMemoryOrderRepository::new()))
        }
    };

    let events = BroadcastSink::new(EVENT_BUFFER);
    let policy = BookingPolicy::from(&rules);
    info!(?policy, "Booking policy loaded");

    let machine = OrderMachine::new(
        inventory,
        orders,
        Arc::new(SimulatedPaymentValidator::new()),
        Arc::new(events.clone()),
        clock,
        policy,
    );

    Ok(Runtime {
        engine: Arc::new(BookingEngine::new(machine)),
        events,
        forward: forward_sink(config)?,
        sweep_interval: std::time::Duration::from_secs(rules.sweep_interval_seconds.max(1)),
    })
}

#[cfg(feature = "kafka")]
fn forward_sink(config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationSink>>> {
    let Some(brokers) = config.kafka.brokers.as_deref() else {
        return Ok(None);
    };
    let sink = altis_store::KafkaSink::new(brokers, config.kafka.topic.clone()).context("Failed to create Kafka producer")?;
    info!(brokers, topic = %config.kafka.topic, "Forwarding booking events to Kafka");
    Ok(Some(Arc::new(sink)))
}

#[cfg(not(feature = "kafka"))]
fn forward_sink(config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationSink>>> {
    if config.kafka.brokers.is_some() {
        warn!("Kafka brokers configured but the kafka feature is disabled");
    }
    Ok(None)
}

/// Ten rows, A to F. Rows 1 and 2 are business class.
pub async fn seed_demo_flight(inventory: &InMemoryInventory) -> Flight {
    let flight = Flight::new("AL100", "TLV", "LHR", chrono::Utc::now() + Duration::days(30), 60);
    let mut seats = Vec::with_capacity(60);
    for row in 1..=10 {
        for column in ["A", "B", "C", "D", "E", "F"] {
            let (class, price) = if row <= 2 {
                (SeatClass::Business, 120_000)
            } else {
                (SeatClass::Economy, 35_000)
            };
            seats.push(Seat::new(flight.id, row, column, class, price));
        }
    }
    inventory.load_flight(flight.clone(), seats).await;
    flight
}
