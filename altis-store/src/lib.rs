//! Persistence for the booking engine: configuration, Postgres repositories,
//! in-memory stand-ins and the optional Kafka event sink.

pub mod app_config;
pub mod database;
pub mod memory;
pub mod order_repo;
pub mod seat_repo;

#[cfg(feature = "kafka")]
pub mod events;

pub use app_config::{BusinessRules, Config};
pub use database::DbClient;
pub use memory::InMemoryOrderRepository;
pub use order_repo::PgOrderRepository;
pub use seat_repo::PgSeatInventory;

#[cfg(feature = "kafka")]
pub use events::{EventProducer, KafkaSink};
