use boxoffice_core::ledger::LedgerError;
use boxoffice_core::repository::RepositoryError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Unique violations become `Duplicate`, undecodable rows `Corrupt`; the rest
/// is treated as the database being unavailable.
pub(crate) fn repo_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Duplicate(db.message().to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            RepositoryError::Corrupt(e.to_string())
        }
        _ => RepositoryError::Storage(e.to_string()),
    }
}

pub(crate) fn ledger_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

/// Counters are constrained non-negative in the schema.
pub(crate) fn to_u32(value: i32) -> u32 {
    value.max(0) as u32
}

pub(crate) fn to_i32(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{value} exceeds column range")))
}
