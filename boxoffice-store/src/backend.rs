use boxoffice_catalog::{InMemoryCatalog, InMemoryLedger};
use boxoffice_core::catalog::ShowtimeCatalog;
use boxoffice_core::ledger::InventoryLedger;
use boxoffice_core::repository::{OrderRepository, ReservationRepository, TicketRepository};
use boxoffice_order::{InMemoryOrderRepository, InMemoryReservationRepository, InMemoryTicketRepository};
use std::sync::Arc;
use tracing::info;

use crate::app_config::{Config, StorageBackend};
use crate::catalog_repo::PgShowtimeCatalog;
use crate::database::DbClient;
use crate::ledger::PgLedger;
use crate::order_repo::PgOrderRepository;
use crate::reservation_repo::PgReservationRepository;
use crate::ticket_repo::PgTicketRepository;

/// The ledger and repositories the engine runs on, behind their traits.
#[derive(Clone)]
pub struct Storage {
    pub ledger: Arc<dyn InventoryLedger>,
    pub catalog: Arc<dyn ShowtimeCatalog>,
    pub reservations: Arc<dyn ReservationRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub tickets: Arc<dyn TicketRepository>,
}

impl Storage {
    pub fn memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            catalog: Arc::new(InMemoryCatalog::new()),
            reservations: Arc::new(InMemoryReservationRepository::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            tickets: Arc::new(InMemoryTicketRepository::new()),
        }
    }

    pub fn postgres(db: &DbClient) -> Self {
        Self {
            ledger: Arc::new(PgLedger::new(db.pool.clone())),
            catalog: Arc::new(PgShowtimeCatalog::new(db.pool.clone())),
            reservations: Arc::new(PgReservationRepository::new(db.pool.clone())),
            orders: Arc::new(PgOrderRepository::new(db.pool.clone())),
            tickets: Arc::new(PgTicketRepository::new(db.pool.clone())),
        }
    }

    /// Build the backend named in `storage.backend`, migrating Postgres first.
    pub async fn open(config: &Config) -> Result<Self, sqlx::Error> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage; state is lost on restart");
                Ok(Self::memory())
            }
            StorageBackend::Postgres => {
                let db = DbClient::new(&config.database.url, config.database.max_connections).await?;
                db.migrate().await?;
                info!("Connected to Postgres");
                Ok(Self::postgres(&db))
            }
        }
    }
}
