use boxoffice_core::catalog::ShowtimeCatalog;
use boxoffice_core::clock::Clock;
use boxoffice_core::events::EventPublisher;
use boxoffice_core::ledger::{InventoryLedger, LedgerError};
use boxoffice_core::models::{Reservation, ReservationState};
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{OrderRepository, RepositoryError, ReservationRepository};
use boxoffice_shared::models::events::{EngineEvent, ReservationCreatedEvent, ReservationExpiredEvent};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::retry::with_backoff;

/// Upper bound on reservations handled by one sweep pass.
pub const SWEEP_BATCH: usize = 500;

/// Longest hold accepted unless `with_max_ttl` says otherwise.
const DEFAULT_MAX_TTL_HOURS: i64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error(transparent)]
    Inventory(#[from] LedgerError),

    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation TTL of {0} seconds is outside the allowed range")]
    InvalidTtl(i64),

    #[error("Showtime {0} is closed")]
    ShowtimeClosed(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ReservationError {
    pub fn is_transient(&self) -> bool {
        match self {
            ReservationError::Inventory(e) => e.is_transient(),
            ReservationError::Repository(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Outcome of one expiry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Settled by payment or failure between listing and expiring.
    pub skipped: usize,
    pub failed: usize,
}

/// Turns purchase intents into time-boxed holds and reclaims abandoned ones.
pub struct ReservationManager {
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn ShowtimeCatalog>,
    reservations: Arc<dyn ReservationRepository>,
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn ShowtimeCatalog>,
        reservations: Arc<dyn ReservationRepository>,
        orders: Arc<dyn OrderRepository>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            catalog,
            reservations,
            orders,
            events,
            clock,
            default_ttl,
            max_ttl: Duration::hours(DEFAULT_MAX_TTL_HOURS),
        }
    }

    /// Cap on the TTL a caller may request.
    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Hold `quantity` tickets of a showtime for `ttl` (or the default TTL).
    pub async fn reserve(
        &self,
        showtime_id: Uuid,
        quantity: u32,
        ttl: Option<Duration>,
    ) -> Result<Reservation, ReservationError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = self.clock.now();
        // Checked before the hold: a failure after `try_hold` would strand capacity.
        if ttl <= Duration::zero() || ttl > self.max_ttl || now.checked_add_signed(ttl).is_none() {
            return Err(ReservationError::InvalidTtl(ttl.num_seconds()));
        }
        // Unlisted showtimes fall through to the ledger, which knows them or not.
        if let Some(listing) = self.catalog.get(showtime_id).await? {
            if listing.is_closed() {
                return Err(ReservationError::ShowtimeClosed(showtime_id));
            }
        }

        let hold = self.ledger.try_hold(showtime_id, quantity).await?;
        let reservation = Reservation::new(hold, ttl, now);

        if let Err(e) = self.reservations.insert(&reservation).await {
            // Without a record the sweep could never find this hold again.
            if let Err(release_err) = with_backoff("release", || self.ledger.release(&hold)).await {
                error!(hold_id = %hold.id, error = %release_err, "failed to release orphaned hold");
            }
            return Err(e.into());
        }

        info!(
            reservation_id = %reservation.id,
            showtime_id = %showtime_id,
            quantity,
            expires_at = %reservation.expires_at,
            "reservation created"
        );
        self.events
            .publish(EngineEvent::ReservationCreated(ReservationCreatedEvent {
                reservation_id: reservation.id,
                showtime_id,
                quantity,
                expires_at: reservation.expires_at.timestamp(),
                timestamp: reservation.created_at.timestamp(),
            }))
            .await;

        Ok(reservation)
    }

    pub async fn get(&self, reservation_id: Uuid) -> Result<Reservation, ReservationError> {
        self.reservations
            .get(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound(reservation_id))
    }

    /// Expire every active reservation past its TTL that has no paid order,
    /// returning its held quantity to the showtime.
    pub async fn expire_sweep(&self) -> Result<SweepReport, ReservationError> {
        let now = self.clock.now();
        let due = self.reservations.list_expirable(now, SWEEP_BATCH).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for reservation in due {
            match self.expire_one(&reservation).await {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(reservation_id = %reservation.id, error = %e, "failed to expire reservation");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire_one(&self, reservation: &Reservation) -> Result<bool, ReservationError> {
        if let Some(order) = self.orders.find_by_reservation(reservation.id).await? {
            if order.payment_status == PaymentStatus::Paid {
                debug!(reservation_id = %reservation.id, order_id = %order.id, "reservation belongs to a paid order");
                return Ok(false);
            }
        }

        // Payment confirmation races on the same swap; whoever wins decides
        // whether the hold is committed or released.
        if !self
            .reservations
            .transition(reservation.id, ReservationState::Active, ReservationState::Expired)
            .await?
        {
            debug!(reservation_id = %reservation.id, "reservation settled before expiry");
            return Ok(false);
        }

        match with_backoff("release", || self.ledger.release(&reservation.hold)).await {
            Ok(()) => {}
            Err(LedgerError::HoldReleased(_)) => {}
            Err(e) => {
                warn!(
                    reservation_id = %reservation.id,
                    hold_id = %reservation.hold.id,
                    "reservation expired but its hold could not be released"
                );
                return Err(e.into());
            }
        }

        info!(
            reservation_id = %reservation.id,
            showtime_id = %reservation.showtime_id,
            quantity = reservation.quantity,
            "reservation expired"
        );
        self.events
            .publish(EngineEvent::ReservationExpired(ReservationExpiredEvent {
                reservation_id: reservation.id,
                showtime_id: reservation.showtime_id,
                quantity: reservation.quantity,
                timestamp: self.clock.now().timestamp(),
            }))
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryOrderRepository, InMemoryReservationRepository};
    use boxoffice_catalog::{InMemoryCatalog, InMemoryLedger};
    use boxoffice_core::catalog::ShowtimeListing;
    use boxoffice_core::clock::ManualClock;
    use rust_decimal_macros::dec;
    use boxoffice_core::events::RecordingPublisher;

    struct Harness {
        manager: Arc<ReservationManager>,
        ledger: Arc<InMemoryLedger>,
        catalog: Arc<InMemoryCatalog>,
        reservations: Arc<InMemoryReservationRepository>,
        clock: Arc<ManualClock>,
        events: Arc<RecordingPublisher>,
        showtime_id: Uuid,
    }

    async fn harness(capacity: u32) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let showtime_id = Uuid::new_v4();
        ledger.set_capacity(showtime_id, capacity).await.unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog
            .upsert(&ShowtimeListing {
                id: showtime_id,
                capacity,
                unit_price: dec!(9.00),
                currency: "EUR".into(),
                starts_at: chrono::Utc::now() + Duration::days(1),
                closed_at: None,
            })
            .await
            .unwrap();
        let reservations = Arc::new(InMemoryReservationRepository::new());
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(RecordingPublisher::new());
        let manager = Arc::new(ReservationManager::new(
            ledger.clone(),
            catalog.clone(),
            reservations.clone(),
            Arc::new(InMemoryOrderRepository::new()),
            events.clone(),
            clock.clone(),
            Duration::minutes(10),
        ));
        Harness {
            manager,
            ledger,
            catalog,
            reservations,
            clock,
            events,
            showtime_id,
        }
    }

    #[tokio::test]
    async fn test_reserve_holds_capacity_with_absolute_expiry() {
        let h = harness(5).await;
        let reservation = h.manager.reserve(h.showtime_id, 2, None).await.unwrap();

        assert_eq!(reservation.state, ReservationState::Active);
        assert_eq!(reservation.expires_at - reservation.created_at, Duration::minutes(10));
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 3);
        assert_eq!(h.events.names().await, vec!["reservation.created"]);
    }

    #[tokio::test]
    async fn test_sold_out_reservation_is_rejected() {
        let h = harness(2).await;
        h.manager.reserve(h.showtime_id, 2, None).await.unwrap();

        let err = h.manager.reserve(h.showtime_id, 1, None).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Inventory(LedgerError::InsufficientInventory { .. })
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_non_positive_ttl_is_rejected() {
        let h = harness(2).await;
        assert!(matches!(
            h.manager.reserve(h.showtime_id, 1, Some(Duration::zero())).await,
            Err(ReservationError::InvalidTtl(0))
        ));
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_held, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_takes_no_hold() {
        let h = harness(2).await;

        for ttl in [Duration::seconds(10_000_000_000_000), Duration::hours(25), Duration::seconds(-5)] {
            assert!(matches!(
                h.manager.reserve(h.showtime_id, 2, Some(ttl)).await,
                Err(ReservationError::InvalidTtl(_))
            ));
        }

        let availability = h.ledger.availability(h.showtime_id).await.unwrap();
        assert_eq!(availability.tickets_held, 0);
        assert_eq!(availability.tickets_available, 2);
        assert!(h.events.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_max_ttl_caps_requested_holds() {
        let h = harness(2).await;
        let manager = ReservationManager::new(
            h.ledger.clone(),
            h.catalog.clone(),
            h.reservations.clone(),
            Arc::new(InMemoryOrderRepository::new()),
            h.events.clone(),
            h.clock.clone(),
            Duration::minutes(10),
        )
        .with_max_ttl(Duration::minutes(15));

        assert!(manager.reserve(h.showtime_id, 1, Some(Duration::minutes(15))).await.is_ok());
        assert!(matches!(
            manager.reserve(h.showtime_id, 1, Some(Duration::minutes(16))).await,
            Err(ReservationError::InvalidTtl(960))
        ));
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_held, 1);
    }

    /// Accepts nothing; every write fails as if the database were down.
    struct UnavailableReservations;

    #[async_trait::async_trait]
    impl ReservationRepository for UnavailableReservations {
        async fn insert(&self, _reservation: &Reservation) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("connection refused".into()))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<Reservation>, RepositoryError> {
            Ok(None)
        }

        async fn transition(
            &self,
            _id: Uuid,
            _from: ReservationState,
            _to: ReservationState,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }

        async fn list_expirable(
            &self,
            _now: chrono::DateTime<chrono::Utc>,
            _limit: usize,
        ) -> Result<Vec<Reservation>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_insert_releases_the_hold() {
        let ledger = Arc::new(InMemoryLedger::new());
        let showtime_id = Uuid::new_v4();
        ledger.set_capacity(showtime_id, 3).await.unwrap();
        let manager = ReservationManager::new(
            ledger.clone(),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(UnavailableReservations),
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(RecordingPublisher::new()),
            Arc::new(ManualClock::default()),
            Duration::minutes(10),
        );

        let err = manager.reserve(showtime_id, 2, None).await.unwrap_err();
        assert!(matches!(err, ReservationError::Repository(RepositoryError::Storage(_))));
        assert!(err.is_transient());

        let availability = ledger.availability(showtime_id).await.unwrap();
        assert_eq!(availability.tickets_held, 0);
        assert_eq!(availability.tickets_available, 3);
        assert!(ledger.inspect(showtime_id, |i| i.invariant_holds()).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_showtime_takes_no_new_holds() {
        let h = harness(3).await;
        h.manager.reserve(h.showtime_id, 1, None).await.unwrap();

        let mut listing = h.catalog.get(h.showtime_id).await.unwrap().unwrap();
        listing.closed_at = Some(h.clock.now());
        h.catalog.upsert(&listing).await.unwrap();

        let err = h.manager.reserve(h.showtime_id, 1, None).await.unwrap_err();
        assert!(matches!(err, ReservationError::ShowtimeClosed(id) if id == h.showtime_id));
        assert!(!err.is_transient());
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_held, 1);
        assert_eq!(h.events.names().await, vec!["reservation.created"]);
    }

    #[tokio::test]
    async fn test_sweep_returns_expired_holds() {
        let h = harness(4).await;
        let before = h.ledger.availability(h.showtime_id).await.unwrap();
        let short = h.manager.reserve(h.showtime_id, 3, Some(Duration::minutes(1))).await.unwrap();
        let long = h.manager.reserve(h.showtime_id, 1, Some(Duration::minutes(30))).await.unwrap();

        h.clock.advance(Duration::minutes(2));
        let report = h.manager.expire_sweep().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(h.reservations.get(short.id).await.unwrap().unwrap().state, ReservationState::Expired);
        assert_eq!(h.reservations.get(long.id).await.unwrap().unwrap().state, ReservationState::Active);
        assert_eq!(
            h.ledger.availability(h.showtime_id).await.unwrap().tickets_available,
            before.tickets_available - 1
        );

        h.clock.advance(Duration::minutes(30));
        h.manager.expire_sweep().await.unwrap();
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_sweep_leaves_settled_reservations_alone() {
        let h = harness(4).await;
        let reservation = h.manager.reserve(h.showtime_id, 2, Some(Duration::minutes(1))).await.unwrap();
        h.reservations
            .transition(reservation.id, ReservationState::Active, ReservationState::Committed)
            .await
            .unwrap();
        h.ledger.commit(&reservation.hold).await.unwrap();

        h.clock.advance(Duration::minutes(5));
        let report = h.manager.expire_sweep().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_sold, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_reservations_grant_floor_of_capacity() {
        let capacity = 7;
        let quantity = 2;
        let h = harness(capacity).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let manager = h.manager.clone();
                let showtime_id = h.showtime_id;
                tokio::spawn(async move { manager.reserve(showtime_id, quantity, None).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(ReservationError::Inventory(LedgerError::InsufficientInventory { .. })) => {}
                Err(other) => panic!("unexpected error {other}"),
            }
        }

        assert_eq!(granted, capacity / quantity);
        let availability = h.ledger.availability(h.showtime_id).await.unwrap();
        assert!(availability.tickets_sold + availability.tickets_held <= capacity);
    }
}
