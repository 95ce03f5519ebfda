use altis_inventory::InventoryError;
use altis_shared::{CustomerInfo, Order, SeatId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actor::{OrderActor, OrderHandle};
use crate::error::{EngineError, StepReport};
use crate::machine::OrderMachine;
use crate::retry::retry_persist;
use crate::signal::{Signal, SignalEnvelope};

/// Request to open a new order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub flight_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    /// Seats to select right away. Empty leaves the order `Pending`.
    #[serde(default)]
    pub seat_ids: Vec<SeatId>,
}

/// Order state as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    /// Seconds left on the seat hold, 0 without an active hold.
    pub remaining_seconds: i64,
}

enum Lookup {
    Live(OrderHandle),
    Settled(Order),
}

/// Registry of order actors.
///
/// Actors are spawned on creation, on recovery, and lazily on the first signal
/// for a stored order that has none. Terminal orders are served straight from
/// the store.
pub struct BookingEngine {
    machine: Arc<OrderMachine>,
    actors: RwLock<HashMap<Uuid, OrderHandle>>,
    tasks: Mutex<JoinSet<()>>,
}

impl BookingEngine {
    pub fn new(machine: OrderMachine) -> Self {
        Self {
            machine: Arc::new(machine),
            actors: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn machine(&self) -> &OrderMachine {
        &self.machine
    }

    pub async fn create_order(&self, request: CreateOrder) -> Result<StepReport, EngineError> {
        let name = request.customer_name.trim();
        let email = request.customer_email.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidRequest("customer name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(EngineError::InvalidRequest("customer email is invalid".to_string()));
        }
        match self.machine.inventory().available_count(request.flight_id).await {
            Ok(_) => {}
            Err(InventoryError::UnknownFlight(flight_id)) => {
                return Err(EngineError::InvalidRequest(format!("unknown flight {}", flight_id)));
            }
            Err(err) => return Err(EngineError::Inventory(err)),
        }

        let order = Order::new(request.flight_id, CustomerInfo::new(name, email), self.machine.clock().now());
        let order_id = order.id;
        retry_persist(&self.machine.policy().persist_retry, || self.machine.orders().insert(&order))
            .await
            .map_err(|source| EngineError::Persistence { order_id, source })?;
        info!(%order_id, flight_id = %order.flight_id, customer = %order.customer.email, "Order created");

        let report = StepReport::applied(&order);
        self.start(order).await;

        if request.seat_ids.is_empty() {
            return Ok(report);
        }
        self.signal(
            order_id,
            SignalEnvelope::new(Signal::SelectSeats {
                seat_ids: request.seat_ids,
            }),
        )
        .await
    }

    /// Route a signal to the order's actor, starting one if needed.
    pub async fn signal(&self, order_id: Uuid, envelope: SignalEnvelope) -> Result<StepReport, EngineError> {
        // a second pass covers an actor that exits between lookup and delivery
        for _ in 0..2 {
            let handle = match self.lookup(order_id).await? {
                Lookup::Live(handle) => handle,
                Lookup::Settled(mut order) => return self.machine.apply(&mut order, envelope).await,
            };
            match handle.signal(envelope.clone()).await {
                Err(EngineError::ActorStopped(_)) => {
                    self.forget(order_id).await;
                    if let Some(mut order) = self.settled(order_id).await? {
                        return self.machine.apply(&mut order, envelope).await;
                    }
                }
                result => return result,
            }
        }
        Err(EngineError::ActorStopped(order_id))
    }

    pub async fn select_seats(
        &self,
        order_id: Uuid,
        seat_ids: Vec<SeatId>,
        key: Option<String>,
    ) -> Result<StepReport, EngineError> {
        self.signal(order_id, SignalEnvelope { key, signal: Signal::SelectSeats { seat_ids } })
            .await
    }

    pub async fn submit_payment(&self, order_id: Uuid, code: &str, key: Option<String>) -> Result<StepReport, EngineError> {
        let signal = Signal::SubmitPayment { code: code.to_string() };
        self.signal(order_id, SignalEnvelope { key, signal }).await
    }

    pub async fn cancel(&self, order_id: Uuid, key: Option<String>) -> Result<StepReport, EngineError> {
        self.signal(order_id, SignalEnvelope { key, signal: Signal::Cancel }).await
    }

    /// Current order state. A lapsed hold is expired before the read.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, EngineError> {
        let order = self.read_order(order_id).await?;
        let remaining_seconds = order.remaining_seconds(self.machine.clock().now());
        Ok(OrderView {
            order,
            remaining_seconds,
        })
    }

    /// Start actors for every non-terminal stored order. Returns how many are running.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let orders = retry_persist(&self.machine.policy().persist_retry, || self.machine.orders().list_active())
            .await
            .map_err(EngineError::Store)?;

        let mut recovered = 0;
        for order in orders {
            let order_id = order.id;
            let handle = match self.start(order).await {
                Lookup::Live(handle) => handle,
                Lookup::Settled(order) => {
                    info!(%order_id, status = %order.status, "Recovered order settled");
                    continue;
                }
            };
            // the first snapshot waits for the actor to settle an interrupted payment
            match handle.snapshot().await {
                Ok(order) if !order.is_terminal() => recovered += 1,
                Ok(order) => info!(%order_id, status = %order.status, "Recovered order settled"),
                Err(EngineError::ActorStopped(_)) => info!(%order_id, "Recovered order settled"),
                Err(err) => error!(%order_id, error = %err, "Failed to recover order"),
            }
        }
        info!(recovered, "Active orders recovered");
        Ok(recovered)
    }

    /// Clear lapsed holds in the inventory and drop exited actors.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let cleared = self.machine.inventory().sweep().await.map_err(EngineError::Inventory)?;
        self.actors.write().await.retain(|_, handle| !handle.is_closed());
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        Ok(cleared)
    }

    pub async fn active_orders(&self) -> usize {
        self.actors
            .read()
            .await
            .values()
            .filter(|handle| !handle.is_closed())
            .count()
    }

    /// Close every actor queue and wait for the actors to finish their current step.
    pub async fn shutdown(&self) {
        self.actors.write().await.clear();
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "Order actor ended abnormally");
            }
        }
        info!("Booking engine stopped");
    }

    async fn read_order(&self, order_id: Uuid) -> Result<Order, EngineError> {
        for _ in 0..2 {
            match self.lookup(order_id).await? {
                Lookup::Settled(order) => return Ok(order),
                Lookup::Live(handle) => match handle.snapshot().await {
                    Err(EngineError::ActorStopped(_)) => {
                        self.forget(order_id).await;
                        if let Some(order) = self.settled(order_id).await? {
                            return Ok(order);
                        }
                    }
                    result => return result,
                },
            }
        }
        Err(EngineError::ActorStopped(order_id))
    }

    async fn live_handle(&self, order_id: Uuid) -> Option<OrderHandle> {
        self.actors
            .read()
            .await
            .get(&order_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    async fn lookup(&self, order_id: Uuid) -> Result<Lookup, EngineError> {
        if let Some(handle) = self.live_handle(order_id).await {
            return Ok(Lookup::Live(handle));
        }

        let order = self.load(order_id).await?;
        Ok(self.start(order).await)
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, EngineError> {
        retry_persist(&self.machine.policy().persist_retry, || self.machine.orders().get(order_id))
            .await
            .map_err(|source| EngineError::Persistence { order_id, source })?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// The stored order once it has reached a terminal state.
    async fn settled(&self, order_id: Uuid) -> Result<Option<Order>, EngineError> {
        let order = self.load(order_id).await?;
        Ok(order.is_terminal().then_some(order))
    }

    /// Register an actor for `order` unless one is already running.
    ///
    /// Only the check and the insert happen under the registry lock. The actor
    /// reloads the order from the store before its first step, so a copy read
    /// before the lock was taken is never acted on.
    async fn start(&self, order: Order) -> Lookup {
        let order_id = order.id;
        let mut actors = self.actors.write().await;
        if let Some(handle) = actors.get(&order_id).filter(|handle| !handle.is_closed()) {
            return Lookup::Live(handle.clone());
        }
        if order.is_terminal() {
            actors.remove(&order_id);
            return Lookup::Settled(order);
        }

        let (actor, handle) = OrderActor::new(self.machine.clone(), order);
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(actor.run());
        actors.insert(order_id, handle.clone());
        Lookup::Live(handle)
    }

    async fn forget(&self, order_id: Uuid) {
        let mut actors = self.actors.write().await;
        if actors.get(&order_id).is_some_and(|handle| handle.is_closed()) {
            actors.remove(&order_id);
        }
    }
}
