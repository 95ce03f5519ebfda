use altis_shared::Order;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("stored record is malformed: {0}")]
    Serialization(String),

    /// The store refused the write, e.g. a constraint violation. Retrying the
    /// same write fails the same way.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable order state. Every transition is written through `save` before its
/// notifications go out, so a restarted engine can rehydrate from here.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    /// Overwrite the stored order with this snapshot.
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// All orders not yet in a terminal state.
    async fn list_active(&self) -> Result<Vec<Order>, StoreError>;
}
