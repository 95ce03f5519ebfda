use altis_core::{OrderRepository, StoreError};
use altis_shared::Order;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Order store for single-process runs and tests.
///
/// Follows the Postgres repository rules: terminal orders are never overwritten.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
    failing_writes: AtomicUsize,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with `StoreError::Unavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        let tripped = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.take_failure()?;
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        self.take_failure()?;
        let mut orders = self.orders.write().await;
        let stored = orders.get_mut(&order.id).ok_or(StoreError::NotFound(order.id))?;
        if stored.is_terminal() {
            warn!(order_id = %order.id, "Ignored write to a terminal order");
            return Ok(());
        }
        *stored = order.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        let mut active: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|o| o.created_at);
        Ok(active)
    }
}
