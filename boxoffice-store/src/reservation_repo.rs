use async_trait::async_trait;
use boxoffice_core::ledger::HoldToken;
use boxoffice_core::models::{Reservation, ReservationState};
use boxoffice_core::repository::{RepoResult, RepositoryError, ReservationRepository};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{repo_error, to_i32, to_u32};

pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    showtime_id: Uuid,
    hold_id: Uuid,
    quantity: i32,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = RepositoryError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let quantity = to_u32(row.quantity);
        Ok(Reservation {
            id: row.id,
            showtime_id: row.showtime_id,
            quantity,
            hold: HoldToken {
                id: row.hold_id,
                showtime_id: row.showtime_id,
                quantity,
            },
            state: row
                .state
                .parse::<ReservationState>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

const COLUMNS: &str = "id, showtime_id, hold_id, quantity, state, created_at, expires_at";

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn insert(&self, reservation: &Reservation) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, showtime_id, hold_id, quantity, state, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.showtime_id)
        .bind(reservation.hold.id)
        .bind(to_i32(reservation.quantity)?)
        .bind(reservation.state.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>(&format!("SELECT {COLUMNS} FROM reservations WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn transition(&self, id: Uuid, from: ReservationState, to: ReservationState) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE reservations SET state = $3 WHERE id = $1 AND state = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {COLUMNS} FROM reservations WHERE state = 'ACTIVE' AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}
