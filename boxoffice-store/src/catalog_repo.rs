use async_trait::async_trait;
use boxoffice_core::catalog::{ShowtimeCatalog, ShowtimeListing};
use boxoffice_core::repository::RepositoryError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{repo_error, to_i32, to_u32};

pub struct PgShowtimeCatalog {
    pool: PgPool,
}

impl PgShowtimeCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    capacity: i32,
    unit_price: Decimal,
    currency: String,
    starts_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl From<ShowtimeRow> for ShowtimeListing {
    fn from(row: ShowtimeRow) -> Self {
        ShowtimeListing {
            id: row.id,
            capacity: to_u32(row.capacity),
            unit_price: row.unit_price,
            currency: row.currency,
            starts_at: row.starts_at,
            closed_at: row.closed_at,
        }
    }
}

#[async_trait]
impl ShowtimeCatalog for PgShowtimeCatalog {
    async fn upsert(&self, listing: &ShowtimeListing) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO showtimes (id, capacity, unit_price, currency, starts_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
                SET capacity = EXCLUDED.capacity,
                    unit_price = EXCLUDED.unit_price,
                    currency = EXCLUDED.currency,
                    starts_at = EXCLUDED.starts_at,
                    closed_at = EXCLUDED.closed_at,
                    updated_at = now()
            "#,
        )
        .bind(listing.id)
        .bind(to_i32(listing.capacity)?)
        .bind(listing.unit_price)
        .bind(&listing.currency)
        .bind(listing.starts_at)
        .bind(listing.closed_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(())
    }

    async fn get(&self, showtime_id: Uuid) -> Result<Option<ShowtimeListing>, RepositoryError> {
        let row = sqlx::query_as::<_, ShowtimeRow>(
            "SELECT id, capacity, unit_price, currency, starts_at, closed_at FROM showtimes WHERE id = $1",
        )
        .bind(showtime_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(row.map(ShowtimeListing::from))
    }
}
