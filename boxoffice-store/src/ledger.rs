use async_trait::async_trait;
use boxoffice_core::ledger::{Availability, HoldToken, InventoryLedger, LedgerError};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::database::{ledger_error, to_u32};

/// Ledger backed by `showtime_inventory` and `holds`. Every counter change is
/// a single conditional statement, so Postgres row locking provides the
/// per-showtime atomicity.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hold_state(&self, hold_id: Uuid) -> Result<Option<String>, LedgerError> {
        sqlx::query_scalar::<_, String>("SELECT state FROM holds WHERE id = $1")
            .bind(hold_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_error)
    }
}

#[derive(sqlx::FromRow)]
struct CounterRow {
    capacity: i32,
    tickets_sold: i32,
    tickets_held: i32,
}

impl CounterRow {
    fn into_availability(self, showtime_id: Uuid) -> Availability {
        Availability::new(
            showtime_id,
            to_u32(self.capacity),
            to_u32(self.tickets_sold),
            to_u32(self.tickets_held),
        )
    }
}

fn quantity_param(quantity: u32) -> Result<i32, LedgerError> {
    match i32::try_from(quantity) {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(LedgerError::InvalidQuantity(quantity)),
    }
}

#[async_trait]
impl InventoryLedger for PgLedger {
    async fn set_capacity(&self, showtime_id: Uuid, capacity: u32) -> Result<Availability, LedgerError> {
        let requested = i32::try_from(capacity).map_err(|_| LedgerError::InvalidQuantity(capacity))?;

        let row = sqlx::query_as::<_, CounterRow>(
            r#"
            INSERT INTO showtime_inventory (showtime_id, capacity)
            VALUES ($1, $2)
            ON CONFLICT (showtime_id) DO UPDATE
                SET capacity = EXCLUDED.capacity, updated_at = now()
                WHERE showtime_inventory.tickets_sold + showtime_inventory.tickets_held <= EXCLUDED.capacity
            RETURNING capacity, tickets_sold, tickets_held
            "#,
        )
        .bind(showtime_id)
        .bind(requested)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_error)?;

        match row {
            Some(row) => Ok(row.into_availability(showtime_id)),
            None => {
                let current = self.availability(showtime_id).await?;
                Err(LedgerError::CapacityBelowUsage {
                    showtime_id,
                    requested: capacity,
                    in_use: current.tickets_sold + current.tickets_held,
                })
            }
        }
    }

    async fn try_hold(&self, showtime_id: Uuid, quantity: u32) -> Result<HoldToken, LedgerError> {
        let q = quantity_param(quantity)?;
        let token = HoldToken::new(showtime_id, quantity);

        let mut tx = self.pool.begin().await.map_err(ledger_error)?;
        let reserved = sqlx::query(
            r#"
            UPDATE showtime_inventory
            SET tickets_held = tickets_held + $2, updated_at = now()
            WHERE showtime_id = $1 AND tickets_sold + tickets_held + $2 <= capacity
            "#,
        )
        .bind(showtime_id)
        .bind(q)
        .execute(&mut *tx)
        .await
        .map_err(ledger_error)?
        .rows_affected();

        if reserved == 0 {
            tx.rollback().await.map_err(ledger_error)?;
            let current = self.availability(showtime_id).await?;
            return Err(LedgerError::InsufficientInventory {
                showtime_id,
                requested: quantity,
                available: current.tickets_available,
            });
        }

        sqlx::query("INSERT INTO holds (id, showtime_id, quantity, state) VALUES ($1, $2, $3, 'ACTIVE')")
            .bind(token.id)
            .bind(showtime_id)
            .bind(q)
            .execute(&mut *tx)
            .await
            .map_err(ledger_error)?;
        tx.commit().await.map_err(ledger_error)?;

        debug!(showtime_id = %showtime_id, hold_id = %token.id, quantity, "hold placed");
        Ok(token)
    }

    async fn commit(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let moved = sqlx::query(
            r#"
            WITH moved AS (
                UPDATE holds SET state = 'COMMITTED', updated_at = now()
                WHERE id = $1 AND state = 'ACTIVE'
                RETURNING showtime_id, quantity
            )
            UPDATE showtime_inventory AS inv
            SET tickets_held = inv.tickets_held - moved.quantity,
                tickets_sold = inv.tickets_sold + moved.quantity,
                updated_at = now()
            FROM moved
            WHERE inv.showtime_id = moved.showtime_id
            "#,
        )
        .bind(token.id)
        .execute(&self.pool)
        .await
        .map_err(ledger_error)?
        .rows_affected();

        if moved == 1 {
            return Ok(());
        }
        match self.hold_state(token.id).await?.as_deref() {
            Some("COMMITTED") => Ok(()),
            Some("RELEASED") => Err(LedgerError::HoldReleased(token.id)),
            _ => Err(LedgerError::UnknownHold(token.id)),
        }
    }

    async fn release(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let moved = sqlx::query(
            r#"
            WITH moved AS (
                UPDATE holds SET state = 'RELEASED', updated_at = now()
                WHERE id = $1 AND state = 'ACTIVE'
                RETURNING showtime_id, quantity
            )
            UPDATE showtime_inventory AS inv
            SET tickets_held = inv.tickets_held - moved.quantity, updated_at = now()
            FROM moved
            WHERE inv.showtime_id = moved.showtime_id
            "#,
        )
        .bind(token.id)
        .execute(&self.pool)
        .await
        .map_err(ledger_error)?
        .rows_affected();

        if moved == 1 {
            return Ok(());
        }
        match self.hold_state(token.id).await?.as_deref() {
            Some("RELEASED") => Ok(()),
            Some("COMMITTED") => Err(LedgerError::HoldCommitted(token.id)),
            _ => Err(LedgerError::UnknownHold(token.id)),
        }
    }

    async fn availability(&self, showtime_id: Uuid) -> Result<Availability, LedgerError> {
        sqlx::query_as::<_, CounterRow>(
            "SELECT capacity, tickets_sold, tickets_held FROM showtime_inventory WHERE showtime_id = $1",
        )
        .bind(showtime_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_error)?
        .map(|row| row.into_availability(showtime_id))
        .ok_or(LedgerError::ShowtimeNotFound(showtime_id))
    }
}
