use async_trait::async_trait;
use boxoffice_core::models::{Ticket, TicketStatus};
use boxoffice_core::repository::{BatchInsert, RepoResult, RepositoryError, TicketRepository};
use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::database::repo_error;

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    ticket_number: String,
    order_id: Uuid,
    showtime_id: Uuid,
    price: Decimal,
    code: String,
    status: String,
    scanned_at: Option<DateTime<Utc>>,
    issued_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = RepositoryError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            ticket_number: row.ticket_number,
            order_id: row.order_id,
            showtime_id: row.showtime_id,
            price: row.price,
            code: Masked::new(row.code),
            status: row
                .status
                .parse::<TicketStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            scanned_at: row.scanned_at,
            issued_at: row.issued_at,
        })
    }
}

const COLUMNS: &str = "id, ticket_number, order_id, showtime_id, price, code, status, scanned_at, issued_at";

fn into_tickets(rows: Vec<TicketRow>) -> RepoResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn allocate_numbers(&self, count: u32) -> RepoResult<Vec<u64>> {
        let numbers = sqlx::query_scalar::<_, i64>("SELECT nextval('ticket_number_seq') FROM generate_series(1, $1)")
            .bind(i64::from(count))
            .fetch_all(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(numbers.into_iter().map(|n| n as u64).collect())
    }

    async fn insert_batch(&self, order_id: Uuid, tickets: &[Ticket]) -> RepoResult<BatchInsert> {
        let mut tx = self.pool.begin().await.map_err(repo_error)?;

        // Concurrent issuers block on the primary key until the first commits.
        let claimed = sqlx::query("INSERT INTO ticket_batches (order_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(repo_error)?
            .rows_affected();

        if claimed == 0 {
            tx.rollback().await.map_err(repo_error)?;
            debug!(order_id = %order_id, "ticket batch already exists");
            return Ok(BatchInsert::AlreadyIssued(self.list_for_order(order_id).await?));
        }

        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (id, ticket_number, order_id, showtime_id, price, code, status, scanned_at, issued_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(ticket.id)
            .bind(&ticket.ticket_number)
            .bind(order_id)
            .bind(ticket.showtime_id)
            .bind(ticket.price)
            .bind(ticket.code.expose())
            .bind(ticket.status.as_str())
            .bind(ticket.scanned_at)
            .bind(ticket.issued_at)
            .execute(&mut *tx)
            .await
            .map_err(repo_error)?;
        }

        tx.commit().await.map_err(repo_error)?;
        Ok(BatchInsert::Inserted(tickets.to_vec()))
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!("SELECT {COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn list_for_order(&self, order_id: Uuid) -> RepoResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY ticket_number"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        into_tickets(rows)
    }

    async fn find_by_code(&self, code: &str) -> RepoResult<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!("SELECT {COLUMNS} FROM tickets WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn mark_scanned(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'SCANNED', scanned_at = $2 WHERE id = $1 AND status = 'VALID'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_for_order(&self, order_id: Uuid) -> RepoResult<u32> {
        let result = sqlx::query("UPDATE tickets SET status = 'CANCELLED' WHERE order_id = $1 AND status IN ('VALID', 'SCANNED')")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(result.rows_affected() as u32)
    }

    async fn expire_for_showtime(&self, showtime_id: Uuid) -> RepoResult<u32> {
        let result = sqlx::query("UPDATE tickets SET status = 'EXPIRED' WHERE showtime_id = $1 AND status = 'VALID'")
            .bind(showtime_id)
            .execute(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(result.rows_affected() as u32)
    }
}
