use async_trait::async_trait;
use boxoffice_core::models::{Buyer, Order, ReconciliationFlag};
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{OrderRepository, RepoResult, RepositoryError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{repo_error, to_i32, to_u32};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    reservation_id: Uuid,
    showtime_id: Uuid,
    quantity: i32,
    buyer: Json<Buyer>,
    currency: String,
    total_amount: Decimal,
    payment_method: Option<String>,
    payment_status: String,
    provider_reference: Option<String>,
    failure_reason: Option<String>,
    reconciliation: Option<Json<ReconciliationFlag>>,
    created_at: DateTime<Utc>,
    purchased_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            reservation_id: row.reservation_id,
            showtime_id: row.showtime_id,
            quantity: to_u32(row.quantity),
            buyer: row.buyer.0,
            currency: row.currency,
            total_amount: row.total_amount,
            payment_method: row.payment_method,
            payment_status: row
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            provider_reference: row.provider_reference,
            failure_reason: row.failure_reason,
            reconciliation: row.reconciliation.map(|flag| flag.0),
            created_at: row.created_at,
            purchased_at: row.purchased_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, reservation_id, showtime_id, quantity, buyer, currency, total_amount, \
    payment_method, payment_status, provider_reference, failure_reason, reconciliation, \
    created_at, purchased_at, updated_at";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, reservation_id, showtime_id, quantity, buyer, currency, total_amount,
                                payment_method, payment_status, provider_reference, failure_reason,
                                reconciliation, created_at, purchased_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(order.reservation_id)
        .bind(order.showtime_id)
        .bind(to_i32(order.quantity)?)
        .bind(Json(&order.buyer))
        .bind(&order.currency)
        .bind(order.total_amount)
        .bind(&order.payment_method)
        .bind(order.payment_status.as_str())
        .bind(&order.provider_reference)
        .bind(&order.failure_reason)
        .bind(order.reconciliation.as_ref().map(Json))
        .bind(order.created_at)
        .bind(order.purchased_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_reservation(&self, reservation_id: Uuid) -> RepoResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {COLUMNS} FROM orders WHERE reservation_id = $1"))
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?
            .map(Order::try_from)
            .transpose()
    }

    async fn compare_and_set(&self, order: &Order, expected: PaymentStatus) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = $3,
                provider_reference = $4,
                failure_reason = $5,
                reconciliation = $6,
                purchased_at = $7,
                updated_at = $8
            WHERE id = $1 AND payment_status = $2
            "#,
        )
        .bind(order.id)
        .bind(expected.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.provider_reference)
        .bind(&order.failure_reason)
        .bind(order.reconciliation.as_ref().map(Json))
        .bind(order.purchased_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_flagged(&self) -> RepoResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {COLUMNS} FROM orders WHERE reconciliation IS NOT NULL \
             ORDER BY (reconciliation->>'flagged_at')::timestamptz"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        rows.into_iter().map(Order::try_from).collect()
    }
}
