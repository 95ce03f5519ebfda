use altis_core::{OrderRepository, StoreError};
use altis_shared::{CustomerInfo, Masked, Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    flight_id: Uuid,
    customer_name: String,
    customer_email: String,
    status: String,
    seat_ids: Vec<String>,
    total_nuc: i32,
    payment_attempts: i32,
    hold_expiry: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    applied_signals: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row.status.parse().map_err(StoreError::Serialization)?;
        let payment_attempts = u32::try_from(row.payment_attempts)
            .map_err(|_| StoreError::Serialization(format!("negative payment_attempts on {}", row.id)))?;

        Ok(Order {
            id: row.id,
            flight_id: row.flight_id,
            customer: CustomerInfo {
                name: row.customer_name,
                email: Masked(row.customer_email),
            },
            status,
            seat_ids: row.seat_ids,
            total_nuc: row.total_nuc,
            payment_attempts,
            hold_expiry: row.hold_expiry,
            failure_reason: row.failure_reason,
            applied_signals: row.applied_signals,
            created_at: row.created_at,
            updated_at: row.updated_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

/// Only connection-level failures are worth retrying.
pub(crate) fn storage_error(err: sqlx::Error) -> StoreError {
    use sqlx::error::ErrorKind;

    match &err {
        sqlx::Error::Database(db)
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) =>
        {
            StoreError::Rejected(err.to_string())
        }
        sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Serialization(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, flight_id, customer_name, customer_email, status, seat_ids, total_nuc,
           payment_attempts, hold_expiry, failure_reason, applied_signals,
           created_at, updated_at, confirmed_at
    FROM orders
"#;

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, flight_id, customer_name, customer_email, status, seat_ids, total_nuc,
                                payment_attempts, hold_expiry, failure_reason, applied_signals,
                                created_at, updated_at, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id)
        .bind(order.flight_id)
        .bind(&order.customer.name)
        .bind(order.customer.email.expose())
        .bind(order.status.as_str())
        .bind(&order.seat_ids)
        .bind(order.total_nuc)
        .bind(order.payment_attempts as i32)
        .bind(order.hold_expiry)
        .bind(&order.failure_reason)
        .bind(&order.applied_signals)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        // Terminal rows are frozen: the WHERE clause refuses to touch them.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, seat_ids = $3, total_nuc = $4, payment_attempts = $5, hold_expiry = $6,
                failure_reason = $7, applied_signals = $8, updated_at = $9, confirmed_at = $10
            WHERE id = $1
              AND status NOT IN ('confirmed', 'failed', 'cancelled', 'expired')
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(&order.seat_ids)
        .bind(order.total_nuc)
        .bind(order.payment_attempts as i32)
        .bind(order.hold_expiry)
        .bind(&order.failure_reason)
        .bind(&order.applied_signals)
        .bind(order.updated_at)
        .bind(order.confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = $1")
                .bind(order.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
            if exists.is_none() {
                return Err(StoreError::NotFound(order.id));
            }
            tracing::warn!(order_id = %order.id, "Ignored write to a terminal order");
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_ORDER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.map(Order::try_from).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "{} WHERE status NOT IN ('confirmed', 'failed', 'cancelled', 'expired') ORDER BY created_at",
            SELECT_ORDER
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.into_iter().map(Order::try_from).collect()
    }
}
