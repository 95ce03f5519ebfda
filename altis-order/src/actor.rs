use altis_shared::Order;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{EngineError, StepReport};
use crate::machine::OrderMachine;
use crate::signal::{Signal, SignalEnvelope};

const INBOX_CAPACITY: usize = 32;

pub(crate) enum Command {
    Signal {
        envelope: SignalEnvelope,
        reply: oneshot::Sender<Result<StepReport, EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Order, EngineError>>,
    },
}

/// Sending side of an order actor's queue.
#[derive(Clone)]
pub struct OrderHandle {
    order_id: Uuid,
    tx: mpsc::Sender<Command>,
}

impl OrderHandle {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    /// The actor has exited; it stops on terminal states and on fatal errors.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn signal(&self, envelope: SignalEnvelope) -> Result<StepReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Signal { envelope, reply })
            .await
            .map_err(|_| EngineError::ActorStopped(self.order_id))?;
        rx.await.map_err(|_| EngineError::ActorStopped(self.order_id))?
    }

    /// Current order, with lazy expiry applied.
    pub async fn snapshot(&self) -> Result<Order, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| EngineError::ActorStopped(self.order_id))?;
        rx.await.map_err(|_| EngineError::ActorStopped(self.order_id))?
    }
}

/// Owns one order and applies its signals and timer strictly one at a time.
pub(crate) struct OrderActor {
    machine: Arc<OrderMachine>,
    order: Order,
    inbox: mpsc::Receiver<Command>,
}

impl OrderActor {
    pub(crate) fn new(machine: Arc<OrderMachine>, order: Order) -> (Self, OrderHandle) {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let handle = OrderHandle { order_id: order.id, tx };
        (Self { machine, order, inbox }, handle)
    }

    pub(crate) async fn run(mut self) {
        let order_id = self.order.id;
        // the previous actor for this order, if any, has exited; the store has its last word
        if let Err(err) = self.machine.rehydrate(&mut self.order).await {
            error!(%order_id, error = %err, "Order could not be rehydrated");
            return;
        }
        debug!(%order_id, status = %self.order.status, "Order actor started");

        while !self.order.is_terminal() {
            let deadline = self.deadline();
            let flow = tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = wait_for(deadline) => self.on_timer().await,
            };
            if flow.is_break() {
                break;
            }
        }

        // answer what was queued before the order settled; terminal steps write nothing
        if self.order.is_terminal() {
            self.inbox.close();
            while let Ok(command) = self.inbox.try_recv() {
                let _ = self.handle(command).await;
            }
        }

        debug!(%order_id, status = %self.order.status, "Order actor stopped");
    }

    /// When the hold timer should fire, re-derived from `hold_expiry` on every
    /// turn so a reselection re-arms it and a terminal state disarms it.
    fn deadline(&self) -> Option<Instant> {
        if !self.order.status.has_active_hold() {
            return None;
        }
        let expiry = self.order.hold_expiry?;
        let remaining = (expiry - self.machine.clock().now()).to_std().unwrap_or(Duration::ZERO);
        Some(Instant::now() + remaining)
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Signal { envelope, reply } => {
                let result = self.machine.apply(&mut self.order, envelope).await;
                let flow = if result.is_err() { ControlFlow::Break(()) } else { ControlFlow::Continue(()) };
                let _ = reply.send(result);
                flow
            }
            Command::Snapshot { reply } => {
                let result = self.machine.observe(&mut self.order).await.map(|()| self.order.clone());
                let flow = if result.is_err() { ControlFlow::Break(()) } else { ControlFlow::Continue(()) };
                let _ = reply.send(result);
                flow
            }
        }
    }

    async fn on_timer(&mut self) -> ControlFlow<()> {
        match self
            .machine
            .apply(&mut self.order, SignalEnvelope::new(Signal::HoldExpired))
            .await
        {
            Ok(_) => ControlFlow::Continue(()),
            Err(err) => {
                error!(order_id = %self.order.id, error = %err, "Hold expiry could not be applied");
                ControlFlow::Break(())
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
