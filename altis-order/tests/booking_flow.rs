use altis_core::{
    Clock, ManualClock, OrderRepository, PaymentError, PaymentValidator, PaymentVerdict, StoreError, SystemClock,
};
use altis_inventory::{InMemoryInventory, SeatInventory};
use altis_order::{
    BookingEngine, BookingError, BookingPolicy, BroadcastSink, CreateOrder, EngineError, OrderMachine, RetryPolicy,
    Signal, SignalEnvelope,
};
use altis_shared::{BookingEvent, CustomerInfo, EventType, Flight, Order, OrderStatus, Seat, SeatClass, SeatStatus};
use altis_store::InMemoryOrderRepository;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Answers with queued verdicts, then approves.
struct ScriptedValidator {
    verdicts: Mutex<VecDeque<PaymentVerdict>>,
    calls: AtomicUsize,
    latency: std::time::Duration,
}

impl ScriptedValidator {
    fn new(verdicts: Vec<PaymentVerdict>) -> Arc<Self> {
        Self::slow(verdicts, std::time::Duration::ZERO)
    }

    fn slow(verdicts: Vec<PaymentVerdict>, latency: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            calls: AtomicUsize::new(0),
            latency,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentValidator for ScriptedValidator {
    async fn validate(&self, _order_id: Uuid, _code: &str, _amount: i32) -> Result<PaymentVerdict, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self.verdicts.lock().unwrap().pop_front().unwrap_or(PaymentVerdict::Approved);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(verdict)
    }
}

enum Interference {
    /// Another order takes the seats while the provider is deciding.
    StealSeats,
    /// The wall clock passes the hold deadline while the provider is deciding.
    LetHoldLapse,
}

/// Approves every payment, but changes the world first.
struct InterferingValidator {
    inventory: Arc<InMemoryInventory>,
    clock: Arc<ManualClock>,
    flight_id: Uuid,
    interference: Interference,
}

#[async_trait]
impl PaymentValidator for InterferingValidator {
    async fn validate(&self, order_id: Uuid, _code: &str, _amount: i32) -> Result<PaymentVerdict, PaymentError> {
        match self.interference {
            Interference::StealSeats => {
                let taken = self
                    .inventory
                    .seats(self.flight_id)
                    .await
                    .unwrap()
                    .into_iter()
                    .filter(|seat| seat.held_by_order == Some(order_id))
                    .map(|seat| seat.id)
                    .collect::<Vec<_>>();
                self.inventory.release(order_id, self.flight_id, &taken).await.unwrap();
                self.inventory
                    .hold(Uuid::new_v4(), self.flight_id, &taken, Duration::minutes(15))
                    .await
                    .unwrap();
            }
            Interference::LetHoldLapse => self.clock.advance(Duration::minutes(16)),
        }
        Ok(PaymentVerdict::Approved)
    }
}

/// Order store whose reads of one order wait until the gate opens.
struct GatedReads {
    inner: Arc<InMemoryOrderRepository>,
    gated: Mutex<Option<Uuid>>,
    opened: tokio::sync::watch::Sender<bool>,
    waiting: AtomicUsize,
}

impl GatedReads {
    fn new(inner: Arc<InMemoryOrderRepository>) -> Arc<Self> {
        let (opened, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            inner,
            gated: Mutex::new(None),
            opened,
            waiting: AtomicUsize::new(0),
        })
    }

    fn gate(&self, order_id: Uuid) {
        *self.gated.lock().unwrap() = Some(order_id);
    }

    fn open(&self) {
        self.opened.send_replace(true);
    }

    async fn until_reader_waits(&self) {
        while self.waiting.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl OrderRepository for GatedReads {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.insert(order).await
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.save(order).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let gated = *self.gated.lock().unwrap() == Some(id);
        if gated {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let mut opened = self.opened.subscribe();
            let _ = opened.wait_for(|open| *open).await;
        }
        self.inner.get(id).await
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        self.inner.list_active().await
    }
}

struct Harness {
    engine: Arc<BookingEngine>,
    inventory: Arc<InMemoryInventory>,
    orders: Arc<InMemoryOrderRepository>,
    clock: Arc<ManualClock>,
    sink: BroadcastSink,
    events: broadcast::Receiver<BookingEvent>,
    flight: Flight,
}

fn test_policy() -> BookingPolicy {
    BookingPolicy {
        persist_retry: RetryPolicy {
            attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
        },
        ..BookingPolicy::default()
    }
}

async fn harness(validator: Arc<dyn PaymentValidator>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let inventory = Arc::new(InMemoryInventory::new(clock.clone()));
    let orders = Arc::new(InMemoryOrderRepository::new());

    let flight = Flight::new("AL204", "TLV", "JFK", clock.now() + Duration::days(10), 4);
    let seats = vec![
        Seat::new(flight.id, 1, "A", SeatClass::Economy, 20_000),
        Seat::new(flight.id, 1, "B", SeatClass::Economy, 20_000),
        Seat::new(flight.id, 2, "A", SeatClass::Economy, 18_000),
        Seat::new(flight.id, 2, "B", SeatClass::Economy, 18_000),
    ];
    inventory.load_flight(flight.clone(), seats).await;

    let sink = BroadcastSink::new(64);
    let events = sink.subscribe();
    let engine = engine_over(&inventory, &orders, &clock, validator, &sink, test_policy());

    Harness {
        engine,
        inventory,
        orders,
        clock,
        sink,
        events,
        flight,
    }
}

fn engine_over(
    inventory: &Arc<InMemoryInventory>,
    orders: &Arc<InMemoryOrderRepository>,
    clock: &Arc<ManualClock>,
    validator: Arc<dyn PaymentValidator>,
    sink: &BroadcastSink,
    policy: BookingPolicy,
) -> Arc<BookingEngine> {
    let machine = OrderMachine::new(
        inventory.clone(),
        orders.clone(),
        validator,
        Arc::new(sink.clone()),
        clock.clone(),
        policy,
    );
    Arc::new(BookingEngine::new(machine))
}

impl Harness {
    async fn new_order(&self) -> Uuid {
        self.engine
            .create_order(CreateOrder {
                flight_id: self.flight.id,
                customer_name: "Noa Cohen".to_string(),
                customer_email: "noa@example.com".to_string(),
                seat_ids: Vec::new(),
            })
            .await
            .unwrap()
            .order
            .id
    }

    async fn seat(&self, id: &str) -> Seat {
        self.inventory
            .seats(self.flight.id)
            .await
            .unwrap()
            .into_iter()
            .find(|seat| seat.id == id)
            .unwrap()
    }

    async fn stored(&self, order_id: Uuid) -> Order {
        self.orders.get(order_id).await.unwrap().unwrap()
    }

    fn drain_events(&mut self) -> Vec<BookingEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn seats(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn test_second_order_conflicts_on_held_seat() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    let o2 = h.new_order().await;

    let first = h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    assert!(first.is_ok());

    let second = h.engine.select_seats(o2, seats(&["1A", "2B"]), None).await.unwrap();
    assert_eq!(
        second.outcome,
        Err(BookingError::Conflict {
            unavailable: seats(&["1A"])
        })
    );
    assert_eq!(second.order.status, OrderStatus::Pending);
    assert!(second.order.seat_ids.is_empty());
    assert_eq!(second.order.failure_reason.as_deref(), Some("seats unavailable: 1A"));

    let seat = h.seat("1A").await;
    assert_eq!(seat.status, SeatStatus::Held);
    assert_eq!(seat.held_by_order, Some(o1));
    // the all-or-nothing hold left 2B alone
    assert_eq!(h.seat("2B").await.status, SeatStatus::Available);

    let events = h.drain_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::SeatsUpdated);
    assert_eq!(events[0].status, Some(SeatStatus::Held));
    assert_eq!(events[1].event_type, EventType::SeatConflict);
    assert_eq!(events[1].order_id, Some(o2));
    assert_eq!(events[1].seat_ids, seats(&["1A"]));
    assert_eq!(events[1].status, None);
}

#[tokio::test]
async fn test_hold_lapses_on_next_access() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    h.drain_events();

    h.clock.advance(Duration::minutes(16));

    // no sweep has run; the inventory already reports the seat free
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);

    let view = h.engine.get_order(o1).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Expired);
    assert_eq!(view.order.failure_reason.as_deref(), Some("hold expired"));
    assert_eq!(view.remaining_seconds, 0);
    assert_eq!(h.stored(o1).await.status, OrderStatus::Expired);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::OrderExpired);
    assert_eq!(events[0].status, Some(SeatStatus::Available));

    let late = h.engine.submit_payment(o1, "12345", None).await.unwrap();
    assert_eq!(late.outcome, Err(BookingError::TerminalState(OrderStatus::Expired)));
}

#[tokio::test]
async fn test_lapsed_hold_rejects_payment_with_expired() {
    let validator = ScriptedValidator::new(vec![]);
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["2A"]), None).await.unwrap();

    h.clock.advance(Duration::minutes(15));
    let report = h.engine.submit_payment(o1, "12345", None).await.unwrap();

    assert_eq!(report.outcome, Err(BookingError::Expired));
    assert_eq!(report.order.status, OrderStatus::Expired);
    assert_eq!(report.order.payment_attempts, 0);
    assert_eq!(validator.calls(), 0);
}

#[tokio::test]
async fn test_malformed_code_does_not_count_as_attempt() {
    let validator = ScriptedValidator::new(vec![]);
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();

    let report = h.engine.submit_payment(o1, "1234", None).await.unwrap();

    assert!(matches!(report.outcome, Err(BookingError::Validation(_))));
    assert_eq!(report.order.status, OrderStatus::SeatsSelected);
    assert_eq!(report.order.payment_attempts, 0);
    assert!(report.order.failure_reason.is_some());
    assert_eq!(validator.calls(), 0);
    assert_eq!(h.seat("1A").await.held_by_order, Some(o1));
}

#[tokio::test]
async fn test_three_retryable_declines_fail_the_order() {
    let decline = PaymentVerdict::declined("issuer unavailable", true);
    let validator = ScriptedValidator::new(vec![decline.clone(), decline.clone(), decline]);
    let mut h = harness(validator.clone()).await;
    let o1 = h.new_order().await;
    let selected = h.engine.select_seats(o1, seats(&["1A", "1B"]), None).await.unwrap();
    let hold_expiry = selected.order.hold_expiry;
    h.drain_events();

    for attempt in 1..=2 {
        h.clock.advance(Duration::seconds(30));
        let report = h.engine.submit_payment(o1, "55555", None).await.unwrap();
        assert!(matches!(
            report.outcome,
            Err(BookingError::PaymentDeclined { retryable: true, .. })
        ));
        assert_eq!(report.order.status, OrderStatus::SeatsSelected);
        assert_eq!(report.order.payment_attempts, attempt);
        // retries do not extend the hold
        assert_eq!(report.order.hold_expiry, hold_expiry);
    }
    // a retryable decline leaves seats held and emits nothing
    assert!(h.drain_events().is_empty());

    let last = h.engine.submit_payment(o1, "55555", None).await.unwrap();
    assert_eq!(last.order.status, OrderStatus::Failed);
    assert_eq!(last.order.payment_attempts, 3);
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);
    assert_eq!(h.seat("1B").await.status, SeatStatus::Available);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::SeatsReleased);
    assert_eq!(events[0].seat_ids, seats(&["1A", "1B"]));

    // a fourth attempt never reaches the validator
    let fourth = h.engine.submit_payment(o1, "55555", None).await.unwrap();
    assert_eq!(fourth.outcome, Err(BookingError::TerminalState(OrderStatus::Failed)));
    assert_eq!(validator.calls(), 3);
    assert_eq!(h.stored(o1).await.payment_attempts, 3);
}

#[tokio::test]
async fn test_non_retryable_decline_does_not_count() {
    let validator = ScriptedValidator::new(vec![PaymentVerdict::declined("card reported stolen", false)]);
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["2B"]), None).await.unwrap();

    let report = h.engine.submit_payment(o1, "99999", None).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(BookingError::PaymentDeclined {
            reason: "card reported stolen".to_string(),
            retryable: false
        })
    );
    assert_eq!(report.order.status, OrderStatus::SeatsSelected);
    assert_eq!(report.order.payment_attempts, 0);
    assert_eq!(report.order.failure_reason.as_deref(), Some("card reported stolen"));

    let retry = h.engine.submit_payment(o1, "12345", None).await.unwrap();
    assert_eq!(retry.order.status, OrderStatus::Confirmed);
    assert_eq!(retry.order.payment_attempts, 1);
}

#[tokio::test]
async fn test_reselection_swaps_hold_and_resets_timer() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    h.drain_events();

    h.clock.advance(Duration::minutes(5));
    let report = h.engine.select_seats(o1, seats(&["1B"]), None).await.unwrap();

    assert!(report.is_ok());
    assert_eq!(report.order.seat_ids, seats(&["1B"]));
    assert_eq!(report.order.total_nuc, 20_000);
    assert_eq!(report.order.hold_expiry, Some(h.clock.now() + Duration::minutes(15)));
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);
    let seat = h.seat("1B").await;
    assert_eq!(seat.status, SeatStatus::Held);
    assert_eq!(seat.held_by_order, Some(o1));

    let events = h.drain_events();
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![EventType::SeatsReleased, EventType::SeatsUpdated]);
    assert_eq!(events[0].seat_ids, seats(&["1A"]));
    assert_eq!(events[1].seat_ids, seats(&["1B"]));
}

#[tokio::test]
async fn test_failed_reselection_keeps_previous_hold() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    let o2 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    h.engine.select_seats(o2, seats(&["2A"]), None).await.unwrap();

    let report = h.engine.select_seats(o1, seats(&["2A"]), None).await.unwrap();

    assert!(matches!(report.outcome, Err(BookingError::Conflict { .. })));
    assert_eq!(report.order.status, OrderStatus::SeatsSelected);
    assert_eq!(report.order.seat_ids, seats(&["1A"]));
    assert_eq!(h.seat("1A").await.held_by_order, Some(o1));
    assert_eq!(h.seat("2A").await.held_by_order, Some(o2));
}

#[tokio::test]
async fn test_payment_confirms_and_books_seats() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let report = h
        .engine
        .create_order(CreateOrder {
            flight_id: h.flight.id,
            customer_name: "Avi Mizrahi".to_string(),
            customer_email: "avi@example.com".to_string(),
            seat_ids: seats(&["2A", "2B"]),
        })
        .await
        .unwrap();
    let order_id = report.order.id;
    assert_eq!(report.order.status, OrderStatus::SeatsSelected);
    assert_eq!(report.order.total_nuc, 36_000);
    h.drain_events();

    let paid = h.engine.submit_payment(order_id, "12345", None).await.unwrap();
    assert!(paid.is_ok());
    assert_eq!(paid.order.status, OrderStatus::Confirmed);
    assert!(paid.order.confirmed_at.is_some());
    assert_eq!(paid.order.payment_attempts, 1);

    let seat = h.seat("2A").await;
    assert_eq!(seat.status, SeatStatus::Booked);
    assert_eq!(seat.held_by_order, None);
    assert_eq!(seat.booked_by_order, Some(order_id));

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::OrderCompleted);
    assert_eq!(events[0].status, Some(SeatStatus::Booked));

    // confirmed orders are never reopened
    let cancel = h.engine.cancel(order_id, None).await.unwrap();
    assert_eq!(cancel.outcome, Err(BookingError::TerminalState(OrderStatus::Confirmed)));
    assert_eq!(cancel.order, paid.order);
    assert_eq!(h.stored(order_id).await, paid.order);
    assert_eq!(h.seat("2A").await.status, SeatStatus::Booked);
}

#[tokio::test]
async fn test_cancel_releases_seats() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A", "2A"]), None).await.unwrap();
    h.drain_events();

    let report = h.engine.cancel(o1, None).await.unwrap();
    assert_eq!(report.order.status, OrderStatus::Cancelled);
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);
    assert_eq!(h.seat("2A").await.status, SeatStatus::Available);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::SeatsReleased);

    let again = h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    assert_eq!(again.outcome, Err(BookingError::TerminalState(OrderStatus::Cancelled)));
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);
}

#[tokio::test]
async fn test_signals_in_wrong_state_are_rejected() {
    let validator = ScriptedValidator::new(vec![]);
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;

    let report = h.engine.submit_payment(o1, "12345", None).await.unwrap();
    assert_eq!(report.outcome, Err(BookingError::InvalidState(OrderStatus::Pending)));

    let empty = h.engine.select_seats(o1, Vec::new(), None).await.unwrap();
    assert!(matches!(empty.outcome, Err(BookingError::Validation(_))));
    assert_eq!(validator.calls(), 0);
}

#[tokio::test]
async fn test_duplicate_signals_apply_once() {
    let validator = ScriptedValidator::new(vec![PaymentVerdict::declined("try again", true)]);
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;

    let first = h.engine.select_seats(o1, seats(&["1A"]), Some("sel-1".into())).await.unwrap();
    assert!(!first.duplicate);
    let replay = h.engine.select_seats(o1, seats(&["1A"]), Some("sel-1".into())).await.unwrap();
    assert!(replay.duplicate);
    assert_eq!(replay.order, first.order);

    let paid = h.engine.submit_payment(o1, "12345", Some("pay-1".into())).await.unwrap();
    assert_eq!(paid.order.payment_attempts, 1);
    let paid_again = h.engine.submit_payment(o1, "12345", Some("pay-1".into())).await.unwrap();
    assert!(paid_again.duplicate);
    assert_eq!(paid_again.order.payment_attempts, 1);
    assert_eq!(validator.calls(), 1);

    let stored = h.stored(o1).await;
    assert!(stored.has_applied("sel-1"));
    assert!(stored.has_applied("pay-1"));

    // a fresh key is a new attempt
    let paid_new = h.engine.submit_payment(o1, "12345", Some("pay-2".into())).await.unwrap();
    assert_eq!(paid_new.order.status, OrderStatus::Confirmed);
    assert_eq!(paid_new.order.payment_attempts, 2);

    // replays of keys applied before the order settled are still recognised
    let late = h.engine.cancel(o1, Some("pay-2".into())).await.unwrap();
    assert!(late.duplicate);
}

#[tokio::test]
async fn test_cancel_waits_for_inflight_payment() {
    let validator = ScriptedValidator::slow(vec![], std::time::Duration::from_millis(300));
    let h = harness(validator.clone()).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1B"]), None).await.unwrap();

    let engine = h.engine.clone();
    let payment = tokio::spawn(async move { engine.submit_payment(o1, "12345", None).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let cancel = h.engine.cancel(o1, None).await.unwrap();
    let payment = payment.await.unwrap().unwrap();

    assert_eq!(payment.order.status, OrderStatus::Confirmed);
    assert_eq!(cancel.outcome, Err(BookingError::TerminalState(OrderStatus::Confirmed)));
    assert_eq!(h.seat("1B").await.status, SeatStatus::Booked);
}

#[tokio::test]
async fn test_concurrent_orders_race_for_one_seat() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let mut order_ids = Vec::new();
    for _ in 0..20 {
        order_ids.push(h.new_order().await);
    }

    let mut tasks = Vec::new();
    for order_id in order_ids {
        let engine = h.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.select_seats(order_id, vec!["1A".to_string()], None).await
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        if report.is_ok() {
            winners.push(report.order.id);
        } else {
            assert!(matches!(report.outcome, Err(BookingError::Conflict { .. })));
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(h.seat("1A").await.held_by_order, Some(winners[0]));
}

#[tokio::test]
async fn test_recovery_rearms_hold_from_store() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    let pending = h.new_order().await;
    h.engine.shutdown().await;
    assert_eq!(h.engine.active_orders().await, 0);

    let restarted = engine_over(
        &h.inventory,
        &h.orders,
        &h.clock,
        ScriptedValidator::new(vec![]),
        &h.sink,
        test_policy(),
    );
    assert_eq!(restarted.recover().await.unwrap(), 2);
    assert_eq!(restarted.active_orders().await, 2);

    let view = restarted.get_order(o1).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::SeatsSelected);
    assert_eq!(view.remaining_seconds, 15 * 60);

    h.clock.advance(Duration::minutes(20));
    let view = restarted.get_order(o1).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Expired);
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);

    let view = restarted.get_order(pending).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Pending);
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_recovery_settles_interrupted_payments() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let now = h.clock.now();

    let interrupted = |seat: &str| {
        let mut order = Order::new(h.flight.id, CustomerInfo::new("Lior Katz", "lior@example.com"), now);
        order.status = OrderStatus::Processing;
        order.seat_ids = seats(&[seat]);
        order.total_nuc = 20_000;
        order.payment_attempts = 1;
        order.hold_expiry = Some(now + Duration::minutes(15));
        order
    };

    // outcome never recorded and seats still only held
    let unknown = interrupted("1A");
    h.inventory
        .hold(unknown.id, h.flight.id, &unknown.seat_ids, Duration::minutes(15))
        .await
        .unwrap();
    h.orders.insert(&unknown).await.unwrap();

    // seats were booked before the crash
    let paid = interrupted("1B");
    h.inventory
        .hold(paid.id, h.flight.id, &paid.seat_ids, Duration::minutes(15))
        .await
        .unwrap();
    h.inventory.commit(paid.id, h.flight.id, &paid.seat_ids).await.unwrap();
    h.orders.insert(&paid).await.unwrap();

    assert_eq!(h.engine.recover().await.unwrap(), 1);

    let resumed = h.stored(unknown.id).await;
    assert_eq!(resumed.status, OrderStatus::SeatsSelected);
    assert_eq!(resumed.payment_attempts, 1);
    assert_eq!(h.seat("1A").await.held_by_order, Some(unknown.id));

    let confirmed = h.stored(paid.id).await;
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    assert!(confirmed.confirmed_at.is_some());
}

#[tokio::test]
async fn test_recovery_fails_order_interrupted_on_last_attempt() {
    let validator = ScriptedValidator::new(vec![]);
    let mut h = harness(validator.clone()).await;
    let now = h.clock.now();

    let mut order = Order::new(h.flight.id, CustomerInfo::new("Lior Katz", "lior@example.com"), now);
    order.status = OrderStatus::Processing;
    order.seat_ids = seats(&["1A"]);
    order.total_nuc = 20_000;
    order.payment_attempts = 3;
    order.hold_expiry = Some(now + Duration::minutes(10));
    h.inventory
        .hold(order.id, h.flight.id, &order.seat_ids, Duration::minutes(10))
        .await
        .unwrap();
    h.orders.insert(&order).await.unwrap();
    h.drain_events();

    assert_eq!(h.engine.recover().await.unwrap(), 0);

    let failed = h.stored(order.id).await;
    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(failed.payment_attempts, 3);
    assert!(failed.failure_reason.as_deref().unwrap().starts_with("payment failed after 3 attempts"));
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::SeatsReleased);
    assert_eq!(events[0].seat_ids, seats(&["1A"]));

    // settled orders answer from the store and never reach the provider again
    let report = h.engine.submit_payment(order.id, "12345", None).await.unwrap();
    assert_eq!(report.outcome, Err(BookingError::TerminalState(OrderStatus::Failed)));
    assert_eq!(validator.calls(), 0);
}

#[tokio::test]
async fn test_hold_lost_before_commit_fails_order() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let validator = Arc::new(InterferingValidator {
        inventory: h.inventory.clone(),
        clock: h.clock.clone(),
        flight_id: h.flight.id,
        interference: Interference::StealSeats,
    });
    let engine = engine_over(&h.inventory, &h.orders, &h.clock, validator, &h.sink, test_policy());

    let created = engine
        .create_order(CreateOrder {
            flight_id: h.flight.id,
            customer_name: "Dana Levi".to_string(),
            customer_email: "dana@example.com".to_string(),
            seat_ids: seats(&["1A", "2A"]),
        })
        .await
        .unwrap();
    let order_id = created.order.id;
    assert_eq!(created.order.status, OrderStatus::SeatsSelected);

    let report = engine.submit_payment(order_id, "12345", None).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(BookingError::NotHeld {
            seats: seats(&["1A", "2A"])
        })
    );
    assert_eq!(report.order.status, OrderStatus::Failed);
    assert_eq!(h.stored(order_id).await.status, OrderStatus::Failed);

    // the rival's holds are untouched and nothing was booked for the failed order
    for id in ["1A", "2A"] {
        let seat = h.seat(id).await;
        assert_eq!(seat.status, SeatStatus::Held);
        assert_ne!(seat.held_by_order, Some(order_id));
        assert_eq!(seat.booked_by_order, None);
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_hold_lapsing_during_payment_expires_order() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let validator = Arc::new(InterferingValidator {
        inventory: h.inventory.clone(),
        clock: h.clock.clone(),
        flight_id: h.flight.id,
        interference: Interference::LetHoldLapse,
    });
    let engine = engine_over(&h.inventory, &h.orders, &h.clock, validator, &h.sink, test_policy());

    let created = engine
        .create_order(CreateOrder {
            flight_id: h.flight.id,
            customer_name: "Dana Levi".to_string(),
            customer_email: "dana@example.com".to_string(),
            seat_ids: seats(&["1B"]),
        })
        .await
        .unwrap();
    let order_id = created.order.id;

    let report = engine.submit_payment(order_id, "12345", None).await.unwrap();
    assert_eq!(report.outcome, Err(BookingError::Expired));
    assert_eq!(report.order.status, OrderStatus::Expired);
    assert_eq!(report.order.payment_attempts, 1);
    assert_eq!(report.order.confirmed_at, None);

    let stored = h.stored(order_id).await;
    assert_eq!(stored.status, OrderStatus::Expired);
    assert_eq!(stored.failure_reason.as_deref(), Some("hold expired"));

    let seat = h.seat("1B").await;
    assert_eq!(seat.status, SeatStatus::Available);
    assert_eq!(seat.booked_by_order, None);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_signal_rehydrates_order_without_actor() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;
    h.engine.shutdown().await;

    let report = h.engine.select_seats(o1, seats(&["2B"]), None).await.unwrap();
    assert!(report.is_ok());
    assert_eq!(h.engine.active_orders().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rehydration_settles_order_once() {
    let mut h = harness(ScriptedValidator::new(vec![])).await;
    let now = h.clock.now();

    let mut order = Order::new(h.flight.id, CustomerInfo::new("Lior Katz", "lior@example.com"), now);
    order.status = OrderStatus::Processing;
    order.seat_ids = seats(&["2A"]);
    order.total_nuc = 18_000;
    order.payment_attempts = 3;
    order.hold_expiry = Some(now + Duration::minutes(10));
    h.inventory
        .hold(order.id, h.flight.id, &order.seat_ids, Duration::minutes(10))
        .await
        .unwrap();
    h.orders.insert(&order).await.unwrap();
    h.drain_events();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let engine = h.engine.clone();
        let order_id = order.id;
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.recover().await.map(|_| ())
            } else {
                engine.get_order(order_id).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.stored(order.id).await.status, OrderStatus::Failed);
    assert_eq!(h.seat("2A").await.status, SeatStatus::Available);
    let released: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|event| event.event_type == EventType::SeatsReleased)
        .collect();
    assert_eq!(released.len(), 1);
    assert_eq!(h.engine.active_orders().await, 0);
}

#[tokio::test]
async fn test_slow_rehydration_does_not_stall_other_orders() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let store = GatedReads::new(h.orders.clone());
    let machine = OrderMachine::new(
        h.inventory.clone(),
        store.clone(),
        ScriptedValidator::new(vec![]),
        Arc::new(h.sink.clone()),
        h.clock.clone(),
        test_policy(),
    );
    let engine = Arc::new(BookingEngine::new(machine));

    let live = engine
        .create_order(CreateOrder {
            flight_id: h.flight.id,
            customer_name: "Noa Cohen".to_string(),
            customer_email: "noa@example.com".to_string(),
            seat_ids: Vec::new(),
        })
        .await
        .unwrap()
        .order
        .id;

    // stored without an actor, and slow to read back
    let parked = Order::new(h.flight.id, CustomerInfo::new("Lior Katz", "lior@example.com"), h.clock.now());
    h.orders.insert(&parked).await.unwrap();
    store.gate(parked.id);

    let slow = {
        let engine = engine.clone();
        let order_id = parked.id;
        tokio::spawn(async move { engine.get_order(order_id).await })
    };
    store.until_reader_waits().await;

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        engine.select_seats(live, seats(&["2A"]), None),
    )
    .await
    .expect("signal for a live order waited on another order's rehydration")
    .unwrap();
    assert!(report.is_ok());
    assert!(!slow.is_finished());

    store.open();
    let view = slow.await.unwrap().unwrap();
    assert_eq!(view.order.status, OrderStatus::Pending);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_persistence_exhaustion_is_operational_error() {
    let h = harness(ScriptedValidator::new(vec![])).await;
    let o1 = h.new_order().await;

    h.orders.fail_next_writes(3);
    let err = h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { order_id, .. } if order_id == o1));

    // the abandoned step left no trace
    assert_eq!(h.stored(o1).await.status, OrderStatus::Pending);
    assert_eq!(h.seat("1A").await.status, SeatStatus::Available);

    // transient failures within the retry budget are absorbed
    h.orders.fail_next_writes(2);
    let report = h.engine.select_seats(o1, seats(&["1A"]), None).await.unwrap();
    assert!(report.is_ok());
    assert_eq!(h.stored(o1).await.status, OrderStatus::SeatsSelected);
}

#[tokio::test]
async fn test_create_order_validates_request() {
    let h = harness(ScriptedValidator::new(vec![])).await;

    let err = h
        .engine
        .create_order(CreateOrder {
            flight_id: Uuid::new_v4(),
            customer_name: "Noa Cohen".to_string(),
            customer_email: "noa@example.com".to_string(),
            seat_ids: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = h
        .engine
        .create_order(CreateOrder {
            flight_id: h.flight.id,
            customer_name: "Noa Cohen".to_string(),
            customer_email: "not-an-email".to_string(),
            seat_ids: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert!(h.orders.is_empty().await);

    let missing = h.engine.get_order(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, EngineError::OrderNotFound(_)));
}

#[tokio::test]
async fn test_hold_timer_expires_idle_order() {
    let clock = Arc::new(SystemClock);
    let inventory = Arc::new(InMemoryInventory::new(clock.clone()));
    let orders = Arc::new(InMemoryOrderRepository::new());
    let flight = Flight::new("AL310", "TLV", "ATH", Utc::now() + Duration::days(1), 1);
    inventory
        .load_flight(flight.clone(), vec![Seat::new(flight.id, 1, "A", SeatClass::Business, 40_000)])
        .await;

    let sink = BroadcastSink::new(16);
    let mut subscription = sink.subscribe_flight(flight.id);
    let policy = BookingPolicy {
        hold_ttl: Duration::milliseconds(200),
        ..test_policy()
    };
    let engine = BookingEngine::new(OrderMachine::new(
        inventory.clone(),
        orders.clone(),
        ScriptedValidator::new(vec![]),
        Arc::new(sink.clone()),
        clock,
        policy,
    ));

    let report = engine
        .create_order(CreateOrder {
            flight_id: flight.id,
            customer_name: "Maya Azulay".to_string(),
            customer_email: "maya@example.com".to_string(),
            seat_ids: vec!["1A".to_string()],
        })
        .await
        .unwrap();
    let order_id = report.order.id;

    let expired = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match subscription.recv().await {
                Some(event) if event.event_type == EventType::OrderExpired => return event,
                Some(_) => continue,
                None => panic!("sink closed"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(expired.order_id, Some(order_id));
    let stored = orders.get(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);
    assert_eq!(stored.failure_reason.as_deref(), Some("hold expired"));
    assert_eq!(inventory.available_count(flight.id).await.unwrap(), 1);

    let cancel = engine.signal(order_id, SignalEnvelope::new(Signal::Cancel)).await.unwrap();
    assert_eq!(cancel.outcome, Err(BookingError::TerminalState(OrderStatus::Expired)));
}
