use altis_core::Clock;
use altis_inventory::{FlightLedger, HoldReceipt, InventoryError, SeatInventory};
use altis_shared::{Flight, Seat, SeatId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Seat inventory backed by the `seats` table.
///
/// Every mutation runs in one transaction that locks the affected seat rows
/// (`FOR UPDATE`, in seat id order), applies the shared `FlightLedger` rules to
/// them, and writes back only the rows that changed.
pub struct PgSeatInventory {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: Uuid,
    flight_number: String,
    origin: String,
    destination: String,
    departure_time: DateTime<Utc>,
    total_seats: i32,
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: String,
    flight_id: Uuid,
    row_number: i32,
    column_letter: String,
    class: String,
    price_nuc: i32,
    status: String,
    held_until: Option<DateTime<Utc>>,
    held_by_order: Option<Uuid>,
    booked_by_order: Option<Uuid>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = InventoryError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            flight_id: row.flight_id,
            row: row.row_number,
            column: row.column_letter,
            class: row.class.parse().map_err(InventoryError::Storage)?,
            price_nuc: row.price_nuc,
            status: row.status.parse().map_err(InventoryError::Storage)?,
            held_until: row.held_until,
            held_by_order: row.held_by_order,
            booked_by_order: row.booked_by_order,
        })
    }
}

fn storage(err: sqlx::Error) -> InventoryError {
    InventoryError::Storage(err.to_string())
}

impl PgSeatInventory {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Insert a flight and its seat map. Existing rows are left untouched.
    pub async fn load_flight(&self, flight: &Flight, seats: &[Seat]) -> Result<(), InventoryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO flights (id, flight_number, origin, destination, departure_time, total_seats)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(flight.id)
        .bind(&flight.flight_number)
        .bind(&flight.origin)
        .bind(&flight.destination)
        .bind(flight.departure_time)
        .bind(flight.total_seats as i32)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        for seat in seats {
            sqlx::query(
                r#"
                INSERT INTO seats (flight_id, id, row_number, column_letter, class, price_nuc, status)
                VALUES ($1, $2, $3, $4, $5, $6, 'available')
                ON CONFLICT (flight_id, id) DO NOTHING
                "#,
            )
            .bind(flight.id)
            .bind(&seat.id)
            .bind(seat.row)
            .bind(&seat.column)
            .bind(seat.class.as_str())
            .bind(seat.price_nuc)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        info!(flight_id = %flight.id, seats = seats.len(), "Flight loaded into inventory");
        Ok(())
    }

    async fn fetch_flight(tx: &mut Transaction<'_, Postgres>, flight_id: Uuid) -> Result<Option<Flight>, InventoryError> {
        let row: Option<FlightRow> = sqlx::query_as(
            "SELECT id, flight_number, origin, destination, departure_time, total_seats FROM flights WHERE id = $1",
        )
        .bind(flight_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;

        Ok(row.map(|row| Flight {
            id: row.id,
            flight_number: row.flight_number,
            origin: row.origin,
            destination: row.destination,
            departure_time: row.departure_time,
            total_seats: u32::try_from(row.total_seats).unwrap_or(0),
        }))
    }

    /// Lock the given seats of a flight, or all of them when `seat_ids` is `None`.
    async fn lock_seats(
        tx: &mut Transaction<'_, Postgres>,
        flight_id: Uuid,
        seat_ids: Option<&[SeatId]>,
    ) -> Result<Vec<Seat>, InventoryError> {
        let rows: Vec<SeatRow> = match seat_ids {
            Some(ids) => sqlx::query_as(
                r#"
                SELECT id, flight_id, row_number, column_letter, class, price_nuc, status,
                       held_until, held_by_order, booked_by_order
                FROM seats
                WHERE flight_id = $1 AND id = ANY($2)
                ORDER BY id
                FOR UPDATE
                "#,
            )
            .bind(flight_id)
            .bind(ids)
            .fetch_all(&mut **tx)
            .await
            .map_err(storage)?,
            None => sqlx::query_as(
                r#"
                SELECT id, flight_id, row_number, column_letter, class, price_nuc, status,
                       held_until, held_by_order, booked_by_order
                FROM seats
                WHERE flight_id = $1
                ORDER BY id
                "#,
            )
            .bind(flight_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(storage)?,
        };
        rows.into_iter().map(Seat::try_from).collect()
    }

    /// Write back seats whose state differs from what was locked.
    async fn write_changes(
        tx: &mut Transaction<'_, Postgres>,
        before: &[Seat],
        after: &[Seat],
    ) -> Result<(), InventoryError> {
        for seat in after {
            if before.iter().any(|b| b == seat) {
                continue;
            }
            sqlx::query(
                r#"
                UPDATE seats
                SET status = $3, held_until = $4, held_by_order = $5, booked_by_order = $6
                WHERE flight_id = $1 AND id = $2
                "#,
            )
            .bind(seat.flight_id)
            .bind(&seat.id)
            .bind(seat.status.as_str())
            .bind(seat.held_until)
            .bind(seat.held_by_order)
            .bind(seat.booked_by_order)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        }
        Ok(())
    }

    /// Run `apply` against a ledger of the locked seats and persist the result.
    async fn with_locked<T, F>(&self, flight_id: Uuid, seat_ids: &[SeatId], apply: F) -> Result<Option<T>, InventoryError>
    where
        F: FnOnce(&mut FlightLedger, DateTime<Utc>) -> Result<T, InventoryError> + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let Some(flight) = Self::fetch_flight(&mut tx, flight_id).await? else {
            return Ok(None);
        };
        let before = Self::lock_seats(&mut tx, flight_id, Some(seat_ids)).await?;
        let mut ledger = FlightLedger::new(flight, before.clone());
        let now = self.clock.now();

        // an Err here drops the transaction, which rolls back
        let out = apply(&mut ledger, now)?;

        let after = ledger.raw_seats();
        Self::write_changes(&mut tx, &before, &after).await?;
        tx.commit().await.map_err(storage)?;
        Ok(Some(out))
    }
}

#[async_trait]
impl SeatInventory for PgSeatInventory {
    async fn hold(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        seat_ids: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError> {
        self.swap(order_id, flight_id, &[], seat_ids, ttl).await
    }

    async fn swap(
        &self,
        order_id: Uuid,
        flight_id: Uuid,
        release: &[SeatId],
        hold: &[SeatId],
        ttl: Duration,
    ) -> Result<HoldReceipt, InventoryError> {
        let touched: Vec<SeatId> = release.iter().chain(hold.iter()).cloned().collect();
        let receipt = self
            .with_locked(flight_id, &touched, |ledger, now| ledger.swap(order_id, release, hold, now + ttl, now))
            .await?
            .ok_or(InventoryError::UnknownFlight(flight_id))?;
        debug!(%order_id, %flight_id, held = ?receipt.seat_ids, released = ?receipt.released, "Seats held");
        Ok(receipt)
    }

    async fn release(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError> {
        let released = self
            .with_locked(flight_id, seat_ids, |ledger, _| Ok(ledger.release(order_id, seat_ids)))
            .await?
            .unwrap_or_default();
        debug!(%order_id, %flight_id, released = ?released, "Seats released");
        Ok(released)
    }

    async fn commit(&self, order_id: Uuid, flight_id: Uuid, seat_ids: &[SeatId]) -> Result<Vec<SeatId>, InventoryError> {
        let booked = self
            .with_locked(flight_id, seat_ids, |ledger, now| ledger.commit(order_id, seat_ids, now))
            .await?
            .ok_or(InventoryError::UnknownFlight(flight_id))?;
        debug!(%order_id, %flight_id, booked = ?booked, "Seats booked");
        Ok(booked)
    }

    async fn sweep(&self) -> Result<usize, InventoryError> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = 'available', held_until = NULL, held_by_order = NULL
            WHERE status = 'held' AND held_until <= $1
            "#,
        )
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() as usize)
    }

    async fn seats(&self, flight_id: Uuid) -> Result<Vec<Seat>, InventoryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let flight = Self::fetch_flight(&mut tx, flight_id)
            .await?
            .ok_or(InventoryError::UnknownFlight(flight_id))?;
        let seats = Self::lock_seats(&mut tx, flight_id, None).await?;
        tx.commit().await.map_err(storage)?;
        Ok(FlightLedger::new(flight, seats).snapshot(self.clock.now()))
    }

    async fn available_count(&self, flight_id: Uuid) -> Result<usize, InventoryError> {
        let seats = self.seats(flight_id).await?;
        Ok(seats.iter().filter(|s| s.status == altis_shared::SeatStatus::Available).count())
    }
}
