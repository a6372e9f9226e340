use boxoffice_core::catalog::ShowtimeCatalog;
use boxoffice_core::clock::Clock;
use boxoffice_core::ledger::InventoryLedger;
use boxoffice_core::repository::TicketRepository;
use boxoffice_order::{CodeSigner, OrderLifecycle, ReservationManager, TicketIssuer, TicketValidator};
use boxoffice_shared::Masked;
use boxoffice_store::{BroadcastPublisher, Config, Storage};
use std::sync::Arc;

use crate::metrics::EngineMetrics;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Engine knobs that come from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reservation_ttl: chrono::Duration,
    pub reservation_max_ttl: chrono::Duration,
    pub code_secret: Masked<String>,
    pub number_prefix: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reservation_ttl: config.reservation_ttl(),
            reservation_max_ttl: config.reservation_max_ttl(),
            code_secret: config.tickets.code_secret.clone(),
            number_prefix: config.tickets.number_prefix.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationManager>,
    pub orders: Arc<OrderLifecycle>,
    pub validator: Arc<TicketValidator>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub catalog: Arc<dyn ShowtimeCatalog>,
    pub tickets: Arc<dyn TicketRepository>,
    pub clock: Arc<dyn Clock>,
    pub sse_tx: BroadcastPublisher,
    pub metrics: Arc<EngineMetrics>,
}

impl AppState {
    /// Wire the engine components over a storage backend.
    pub fn build(
        storage: Storage,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, prometheus::Error> {
        let bus = BroadcastPublisher::new(EVENT_BUS_CAPACITY);
        let events = Arc::new(bus.clone());
        let signer = Arc::new(CodeSigner::new(settings.code_secret.expose().as_bytes()));

        let issuer = Arc::new(TicketIssuer::new(
            storage.tickets.clone(),
            signer.clone(),
            clock.clone(),
            settings.number_prefix,
        ));
        let reservations = Arc::new(
            ReservationManager::new(
                storage.ledger.clone(),
                storage.catalog.clone(),
                storage.reservations.clone(),
                storage.orders.clone(),
                events.clone(),
                clock.clone(),
                settings.reservation_ttl,
            )
            .with_max_ttl(settings.reservation_max_ttl),
        );
        let orders = Arc::new(OrderLifecycle::new(
            storage.ledger.clone(),
            storage.catalog.clone(),
            storage.reservations.clone(),
            storage.orders.clone(),
            storage.tickets.clone(),
            issuer,
            events.clone(),
            clock.clone(),
        ));
        let validator = Arc::new(TicketValidator::new(storage.tickets.clone(), signer, events, clock.clone()));

        Ok(Self {
            reservations,
            orders,
            validator,
            ledger: storage.ledger,
            catalog: storage.catalog,
            tickets: storage.tickets,
            clock,
            sse_tx: bus,
            metrics: Arc::new(EngineMetrics::new()?),
        })
    }
}
