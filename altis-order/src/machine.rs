use altis_core::{Clock, NotificationSink, OrderRepository, PaymentValidator, PaymentVerdict};
use altis_inventory::{HoldReceipt, InventoryError, SeatInventory};
use altis_shared::{BookingEvent, Order, OrderStatus, SeatId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{BookingError, EngineError, StepReport};
use crate::payment::PaymentGateway;
use crate::policy::BookingPolicy;
use crate::retry::retry_persist;
use crate::signal::{Signal, SignalEnvelope};

pub const HOLD_EXPIRED_REASON: &str = "hold expired";

/// The order transition function and the collaborators it drives.
///
/// A step works on a copy of the order. The copy replaces the caller's order
/// only after it has been written to the store, and events are published after
/// that, so subscribers never see a change that could be lost on restart.
pub struct OrderMachine {
    inventory: Arc<dyn SeatInventory>,
    orders: Arc<dyn OrderRepository>,
    payments: PaymentGateway,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl OrderMachine {
    pub fn new(
        inventory: Arc<dyn SeatInventory>,
        orders: Arc<dyn OrderRepository>,
        validator: Arc<dyn PaymentValidator>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        let payments = PaymentGateway::new(validator, policy.payment_timeout);
        Self {
            inventory,
            orders,
            payments,
            sink,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn inventory(&self) -> &Arc<dyn SeatInventory> {
        &self.inventory
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    /// Apply one signal to `order`.
    ///
    /// Business outcomes are reported in the `StepReport`; `Err` means the step
    /// could not be made durable and `order` still holds the last stored state.
    pub async fn apply(&self, order: &mut Order, envelope: SignalEnvelope) -> Result<StepReport, EngineError> {
        let SignalEnvelope { key, signal } = envelope;
        let key = key.as_deref();

        if let Some(key) = key {
            if order.has_applied(key) {
                debug!(order_id = %order.id, key, "Duplicate signal ignored");
                return Ok(StepReport::duplicate(order));
            }
        }

        if order.is_terminal() {
            warn!(order_id = %order.id, status = %order.status, signal = signal.name(), "Signal ignored on terminal order");
            return Ok(StepReport::rejected(order, BookingError::TerminalState(order.status)));
        }

        let now = self.clock.now();
        if order.hold_lapsed(now) {
            self.expire(order, key, now).await?;
            return Ok(match signal {
                Signal::HoldExpired => StepReport::applied(order),
                _ => StepReport::rejected(order, BookingError::Expired),
            });
        }

        match signal {
            Signal::SelectSeats { seat_ids } => self.select_seats(order, key, seat_ids, now).await,
            Signal::SubmitPayment { code } => self.submit_payment(order, key, &code, now).await,
            Signal::Cancel => self.cancel(order, key, now).await,
            // timer fired early relative to the wall clock; the actor re-arms it
            Signal::HoldExpired => Ok(StepReport::applied(order)),
        }
    }

    /// Apply lazy expiry ahead of a read.
    pub async fn observe(&self, order: &mut Order) -> Result<(), EngineError> {
        let now = self.clock.now();
        if !order.is_terminal() && order.hold_lapsed(now) {
            self.expire(order, None, now).await?;
        }
        Ok(())
    }

    /// Replace `order` with its stored state, then settle an interrupted payment.
    pub(crate) async fn rehydrate(&self, order: &mut Order) -> Result<(), EngineError> {
        let order_id = order.id;
        *order = retry_persist(&self.policy.persist_retry, || self.orders.get(order_id))
            .await
            .map_err(|source| EngineError::Persistence { order_id, source })?
            .ok_or(EngineError::OrderNotFound(order_id))?;
        self.resume(order).await
    }

    /// Settle an order whose actor died between recording a payment attempt and
    /// recording its outcome.
    ///
    /// If the seats were already booked for this order the payment went through
    /// and the order is confirmed. Otherwise the attempt counts as a retryable
    /// failure: the order goes back to `SeatsSelected`, or fails and releases its
    /// seats when that was the last attempt allowed.
    async fn resume(&self, order: &mut Order) -> Result<(), EngineError> {
        if order.status != OrderStatus::Processing {
            return Ok(());
        }

        let seats = match self.inventory.seats(order.flight_id).await {
            Ok(seats) => seats,
            Err(InventoryError::UnknownFlight(_)) => Vec::new(),
            Err(err) => return Err(EngineError::Inventory(err)),
        };
        let booked = !order.seat_ids.is_empty()
            && order.seat_ids.iter().all(|id| {
                seats
                    .iter()
                    .any(|seat| &seat.id == id && seat.booked_by_order == Some(order.id))
            });

        let now = self.clock.now();
        let mut next = order.clone();
        let mut events = Vec::new();
        if booked {
            next.status = OrderStatus::Confirmed;
            next.confirmed_at = Some(now);
            next.hold_expiry = None;
            next.failure_reason = None;
            events.push(BookingEvent::order_completed(order.flight_id, order.id, order.seat_ids.clone(), now));
        } else if order.payment_attempts >= self.policy.max_payment_attempts {
            let released = self.release_held(order).await?;
            next.status = OrderStatus::Failed;
            next.failure_reason = Some(format!(
                "payment failed after {} attempts: outcome unknown",
                order.payment_attempts
            ));
            events = released_event(order, released, now);
        } else {
            next.status = OrderStatus::SeatsSelected;
            next.failure_reason = Some("payment outcome unknown, please resubmit".to_string());
        }
        self.commit_step(order, next, None, now, events).await?;
        info!(order_id = %order.id, status = %order.status, "Interrupted payment resolved");
        Ok(())
    }

    async fn select_seats(
        &self,
        order: &mut Order,
        key: Option<&str>,
        seat_ids: Vec<SeatId>,
        now: DateTime<Utc>,
    ) -> Result<StepReport, EngineError> {
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::SeatsSelected | OrderStatus::AwaitingPayment
        ) {
            return Ok(self.invalid(order, "select_seats"));
        }
        if seat_ids.is_empty() {
            return Ok(StepReport::rejected(
                order,
                BookingError::Validation("at least one seat is required".to_string()),
            ));
        }

        let current = if order.status.has_active_hold() {
            order.seat_ids.clone()
        } else {
            Vec::new()
        };

        let receipt = match self
            .inventory
            .swap(order.id, order.flight_id, &current, &seat_ids, self.policy.hold_ttl)
            .await
        {
            Ok(receipt) => receipt,
            Err(InventoryError::Conflict { unavailable }) => {
                let mut next = order.clone();
                next.failure_reason = Some(format!("seats unavailable: {}", unavailable.join(", ")));
                let events = vec![BookingEvent::seat_conflict(order.flight_id, order.id, unavailable.clone(), now)];
                self.commit_step(order, next, key, now, events).await?;
                warn!(order_id = %order.id, flight_id = %order.flight_id, unavailable = ?unavailable, "Seat selection conflicted");
                return Ok(StepReport::rejected(order, BookingError::Conflict { unavailable }));
            }
            Err(InventoryError::UnknownFlight(flight_id)) => {
                return Ok(StepReport::rejected(
                    order,
                    BookingError::Validation(format!("unknown flight {}", flight_id)),
                ));
            }
            Err(err) => return Err(EngineError::Inventory(err)),
        };

        let mut next = order.clone();
        next.status = OrderStatus::SeatsSelected;
        next.seat_ids = receipt.seat_ids.clone();
        next.total_nuc = receipt.total_nuc;
        next.hold_expiry = Some(receipt.held_until);
        next.failure_reason = None;

        let mut events = Vec::new();
        if !receipt.released.is_empty() {
            events.push(BookingEvent::seats_released(order.flight_id, order.id, receipt.released.clone(), now));
        }
        events.push(BookingEvent::seats_held(order.flight_id, order.id, receipt.seat_ids.clone(), now));

        if let Err(err) = self.commit_step(order, next, key, now, events).await {
            self.undo_swap(order, &receipt, now).await;
            return Err(err);
        }

        info!(
            order_id = %order.id,
            flight_id = %order.flight_id,
            seats = ?order.seat_ids,
            total_nuc = order.total_nuc,
            "Seats selected"
        );
        Ok(StepReport::applied(order))
    }

    /// Put the inventory back the way the stored order describes it after a
    /// selection could not be persisted.
    async fn undo_swap(&self, order: &Order, receipt: &HoldReceipt, now: DateTime<Utc>) {
        let fresh: Vec<SeatId> = receipt
            .seat_ids
            .iter()
            .filter(|id| !order.seat_ids.contains(*id))
            .cloned()
            .collect();
        let remaining = order.hold_expiry.map(|expiry| expiry - now).filter(|d| *d > chrono::Duration::zero());

        let result = match remaining {
            Some(ttl) if order.status.has_active_hold() => self
                .inventory
                .swap(order.id, order.flight_id, &fresh, &order.seat_ids, ttl)
                .await
                .map(|_| ()),
            _ => self.inventory.release(order.id, order.flight_id, &fresh).await.map(|_| ()),
        };
        if let Err(err) = result {
            warn!(order_id = %order.id, error = %err, "Could not restore seat holds after failed write");
        }
    }

    async fn submit_payment(
        &self,
        order: &mut Order,
        key: Option<&str>,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<StepReport, EngineError> {
        if !matches!(order.status, OrderStatus::SeatsSelected | OrderStatus::AwaitingPayment)
            || order.payment_attempts >= self.policy.max_payment_attempts
        {
            return Ok(self.invalid(order, "submit_payment"));
        }

        if let Err(err) = self.payments.check_code(code) {
            let mut next = order.clone();
            next.failure_reason = Some(err.to_string());
            self.commit_step(order, next, key, now, Vec::new()).await?;
            warn!(order_id = %order.id, "Malformed payment code rejected");
            return Ok(StepReport::rejected(order, err));
        }

        // 1. Record the attempt before the provider sees it
        let mut processing = order.clone();
        processing.status = OrderStatus::Processing;
        processing.payment_attempts += 1;
        processing.failure_reason = None;
        self.commit_step(order, processing, key, now, Vec::new()).await?;
        let attempt = order.payment_attempts;
        info!(order_id = %order.id, attempt, amount = order.total_nuc, "Payment submitted");

        // 2. Ask the provider
        let verdict = self.payments.authorize(order.id, code, order.total_nuc).await;

        // 3. The hold may have lapsed while we waited
        let now = self.clock.now();
        if order.hold_lapsed(now) {
            self.expire(order, None, now).await?;
            return Ok(StepReport::rejected(order, BookingError::Expired));
        }

        match verdict {
            PaymentVerdict::Approved => self.confirm(order, now).await,
            PaymentVerdict::Declined { retryable: false, reason } => {
                let mut next = order.clone();
                next.status = OrderStatus::SeatsSelected;
                next.payment_attempts = next.payment_attempts.saturating_sub(1);
                next.failure_reason = Some(reason.clone());
                self.commit_step(order, next, None, now, Vec::new()).await?;
                warn!(order_id = %order.id, reason = %reason, "Payment declined, attempt not counted");
                Ok(StepReport::rejected(order, BookingError::PaymentDeclined { reason, retryable: false }))
            }
            PaymentVerdict::Declined { retryable: true, reason } if attempt < self.policy.max_payment_attempts => {
                let mut next = order.clone();
                next.status = OrderStatus::SeatsSelected;
                next.failure_reason = Some(reason.clone());
                self.commit_step(order, next, None, now, Vec::new()).await?;
                warn!(order_id = %order.id, attempt, reason = %reason, "Payment declined, retry allowed");
                Ok(StepReport::rejected(order, BookingError::PaymentDeclined { reason, retryable: true }))
            }
            PaymentVerdict::Declined { reason, .. } => {
                let released = self.release_held(order).await?;
                let mut next = order.clone();
                next.status = OrderStatus::Failed;
                next.failure_reason = Some(format!("payment failed after {} attempts: {}", attempt, reason));
                let events = released_event(order, released, now);
                self.commit_step(order, next, None, now, events).await?;
                error!(order_id = %order.id, attempt, reason = %reason, "Payment attempts exhausted, order failed");
                Ok(StepReport::rejected(order, BookingError::PaymentDeclined { reason, retryable: true }))
            }
        }
    }

    async fn confirm(&self, order: &mut Order, now: DateTime<Utc>) -> Result<StepReport, EngineError> {
        match self.inventory.commit(order.id, order.flight_id, &order.seat_ids).await {
            Ok(booked) => {
                let mut next = order.clone();
                next.status = OrderStatus::Confirmed;
                next.confirmed_at = Some(now);
                next.hold_expiry = None;
                next.failure_reason = None;
                let events = vec![BookingEvent::order_completed(order.flight_id, order.id, booked, now)];
                self.commit_step(order, next, None, now, events).await?;
                info!(order_id = %order.id, seats = ?order.seat_ids, "Order confirmed");
                Ok(StepReport::applied(order))
            }
            Err(InventoryError::NotHeld { seats }) => self.fail_not_held(order, seats, now).await,
            Err(InventoryError::UnknownFlight(_)) => {
                let seats = order.seat_ids.clone();
                self.fail_not_held(order, seats, now).await
            }
            Err(err) => Err(EngineError::Inventory(err)),
        }
    }

    async fn fail_not_held(
        &self,
        order: &mut Order,
        seats: Vec<SeatId>,
        now: DateTime<Utc>,
    ) -> Result<StepReport, EngineError> {
        let released = self.release_held(order).await?;
        let mut next = order.clone();
        next.status = OrderStatus::Failed;
        next.failure_reason = Some(format!("seats no longer held: {}", seats.join(", ")));
        let events = released_event(order, released, now);
        self.commit_step(order, next, None, now, events).await?;
        error!(order_id = %order.id, seats = ?seats, "Hold lost before commit, order failed");
        Ok(StepReport::rejected(order, BookingError::NotHeld { seats }))
    }

    async fn cancel(&self, order: &mut Order, key: Option<&str>, now: DateTime<Utc>) -> Result<StepReport, EngineError> {
        let released = self.release_held(order).await?;
        let mut next = order.clone();
        next.status = OrderStatus::Cancelled;
        next.failure_reason = Some("cancelled".to_string());
        let events = released_event(order, released, now);
        self.commit_step(order, next, key, now, events).await?;
        info!(order_id = %order.id, "Order cancelled");
        Ok(StepReport::applied(order))
    }

    async fn expire(&self, order: &mut Order, key: Option<&str>, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.release_held(order).await?;
        let mut next = order.clone();
        next.status = OrderStatus::Expired;
        next.failure_reason = Some(HOLD_EXPIRED_REASON.to_string());
        let events = vec![BookingEvent::order_expired(order.flight_id, order.id, order.seat_ids.clone(), now)];
        self.commit_step(order, next, key, now, events).await?;
        info!(order_id = %order.id, seats = ?order.seat_ids, "Seat hold expired");
        Ok(())
    }

    async fn release_held(&self, order: &Order) -> Result<Vec<SeatId>, EngineError> {
        if !order.status.has_active_hold() || order.seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.inventory
            .release(order.id, order.flight_id, &order.seat_ids)
            .await
            .map_err(EngineError::Inventory)
    }

    /// Persist `next`, then adopt it and publish `events`.
    async fn commit_step(
        &self,
        order: &mut Order,
        mut next: Order,
        key: Option<&str>,
        now: DateTime<Utc>,
        events: Vec<BookingEvent>,
    ) -> Result<(), EngineError> {
        if let Some(key) = key {
            next.remember_signal(key);
        }
        next.touch(now);
        self.persist(&next).await?;
        *order = next;
        if !events.is_empty() {
            self.sink.publish(events).await;
        }
        Ok(())
    }

    pub(crate) async fn persist(&self, order: &Order) -> Result<(), EngineError> {
        retry_persist(&self.policy.persist_retry, || self.orders.save(order))
            .await
            .map_err(|source| {
                error!(order_id = %order.id, status = %order.status, error = %source, "Order write abandoned");
                EngineError::Persistence {
                    order_id: order.id,
                    source,
                }
            })
    }

    fn invalid(&self, order: &Order, signal: &str) -> StepReport {
        warn!(order_id = %order.id, status = %order.status, signal, "Signal not valid in current state");
        StepReport::rejected(order, BookingError::InvalidState(order.status))
    }
}

fn released_event(order: &Order, released: Vec<SeatId>, now: DateTime<Utc>) -> Vec<BookingEvent> {
    if released.is_empty() {
        return Vec::new();
    }
    vec![BookingEvent::seats_released(order.flight_id, order.id, released, now)]
}
