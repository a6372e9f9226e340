use boxoffice_catalog::pricing::quote;
use boxoffice_core::catalog::ShowtimeCatalog;
use boxoffice_core::clock::Clock;
use boxoffice_core::events::EventPublisher;
use boxoffice_core::ledger::{InventoryLedger, LedgerError};
use boxoffice_core::models::{Buyer, Order, ReconciliationFlag, Reservation, ReservationState, Ticket};
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{OrderRepository, RepositoryError, ReservationRepository, TicketRepository};
use boxoffice_shared::models::events::{
    EngineEvent, OrderFailedEvent, OrderPaidEvent, OrderRefundedEvent, ReconciliationFlaggedEvent,
    TicketsIssuedEvent,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::fulfillment::{IssuanceError, IssuedBatch, TicketIssuer};
use crate::retry::with_backoff;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition for order {order_id} from {from} to {to}")]
    InvalidStateTransition {
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Reservation {0} has expired or does not exist")]
    ReservationExpiredOrMissing(Uuid),

    #[error("Reservation {0} already has an order")]
    ReservationAlreadyOrdered(Uuid),

    #[error("Showtime {0} is not listed")]
    ShowtimeNotListed(Uuid),

    #[error("Showtime {0} is closed")]
    ShowtimeClosed(Uuid),

    #[error("Payment for order {order_id} arrived after reservation {reservation_id} was {reservation_state}; flagged for reconciliation")]
    ReservationConflict {
        order_id: Uuid,
        reservation_id: Uuid,
        reservation_state: ReservationState,
    },

    #[error("Order {order_id} was settled as {status} while its payment was being confirmed; flagged for reconciliation")]
    ConflictingOutcome { order_id: Uuid, status: PaymentStatus },

    #[error("Order {order_id} is already paid under a different provider reference")]
    PaymentReferenceMismatch { order_id: Uuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

impl OrderError {
    pub fn is_transient(&self) -> bool {
        match self {
            OrderError::Ledger(e) => e.is_transient(),
            OrderError::Repository(e) => e.is_transient(),
            OrderError::Issuance(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Checkout request for an active reservation.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub reservation_id: Uuid,
    pub buyer: Buyer,
    /// Total the buyer was shown. Rejected if the listing price has moved.
    pub expected_total: Option<Decimal>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    /// `true` when the order was already paid and this was a redelivery.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundSummary {
    pub order: Order,
    pub cancelled_tickets: u32,
}

/// Drives orders through `Pending → Paid | Failed` and `Paid → Refunded`,
/// keeping the reservation, the ledger and the ticket store in step.
pub struct OrderLifecycle {
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn ShowtimeCatalog>,
    reservations: Arc<dyn ReservationRepository>,
    orders: Arc<dyn OrderRepository>,
    tickets: Arc<dyn TicketRepository>,
    issuer: Arc<TicketIssuer>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl OrderLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn ShowtimeCatalog>,
        reservations: Arc<dyn ReservationRepository>,
        orders: Arc<dyn OrderRepository>,
        tickets: Arc<dyn TicketRepository>,
        issuer: Arc<TicketIssuer>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            reservations,
            orders,
            tickets,
            issuer,
            events,
            clock,
        }
    }

    /// Open a `Pending` order against an active reservation, priced from the
    /// showtime listing.
    pub async fn create(&self, request: NewOrder) -> Result<Order, OrderError> {
        request
            .buyer
            .validate()
            .map_err(|e| OrderError::Validation(e.to_string()))?;

        let now = self.clock.now();
        let reservation = match self.reservations.get(request.reservation_id).await? {
            Some(r) if r.is_active() && !r.is_past_expiry(now) => r,
            _ => return Err(OrderError::ReservationExpiredOrMissing(request.reservation_id)),
        };

        let listing = self
            .catalog
            .get(reservation.showtime_id)
            .await?
            .ok_or(OrderError::ShowtimeNotListed(reservation.showtime_id))?;
        if listing.is_closed() {
            // The hold stays until the sweep reclaims it.
            return Err(OrderError::ShowtimeClosed(reservation.showtime_id));
        }
        let quote = quote(&listing, reservation.quantity).map_err(|e| OrderError::Validation(e.to_string()))?;

        if let Some(expected) = request.expected_total {
            if expected != quote.total {
                return Err(OrderError::Validation(format!(
                    "expected total {expected} does not match current total {}",
                    quote.total
                )));
            }
        }

        let order = Order::new(
            &reservation,
            request.buyer,
            quote.total,
            quote.currency,
            request.payment_method,
            now,
        );
        match self.orders.insert(&order).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(_)) => {
                return Err(OrderError::ReservationAlreadyOrdered(reservation.id))
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            order_id = %order.id,
            reservation_id = %reservation.id,
            total = %order.total_amount,
            currency = %order.currency,
            "order created"
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.orders.get(order_id).await?.ok_or(OrderError::NotFound(order_id))
    }

    pub async fn tickets(&self, order_id: Uuid) -> Result<Vec<Ticket>, OrderError> {
        let order = self.get(order_id).await?;
        Ok(self.tickets.list_for_order(order.id).await?)
    }

    /// Orders waiting on an operator after a late payment.
    pub async fn flagged(&self) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_flagged().await?)
    }

    /// Settle a successful payment: commit the hold, mark the order paid and
    /// issue its tickets. Safe to call again with the same reference.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        provider_reference: &str,
    ) -> Result<PaymentConfirmation, OrderError> {
        let order = self.get(order_id).await?;
        match order.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Paid => return self.replay_confirmation(order, provider_reference).await,
            from => return Err(invalid_transition(&order, from, PaymentStatus::Paid)),
        }

        if let Some(flag) = &order.reconciliation {
            warn!(order_id = %order.id, "payment redelivered for an order awaiting reconciliation");
            return Err(OrderError::ReservationConflict {
                order_id: order.id,
                reservation_id: order.reservation_id,
                reservation_state: flag.reservation_state,
            });
        }

        let reservation = self.reservation_of(&order).await?;

        // The sweep races on this swap. Losing to it means the capacity has
        // gone back on sale and the money has nowhere to land.
        if !self
            .reservations
            .transition(reservation.id, ReservationState::Active, ReservationState::Committed)
            .await?
        {
            let state = self
                .reservations
                .get(reservation.id)
                .await?
                .map(|r| r.state)
                .unwrap_or(reservation.state);
            if state != ReservationState::Committed {
                return Err(self.flag_for_reconciliation(&order, provider_reference, state).await?);
            }
        }

        with_backoff("commit", || self.ledger.commit(&reservation.hold)).await?;

        let now = self.clock.now();
        let mut paid = order.clone();
        paid.payment_status = PaymentStatus::Paid;
        paid.provider_reference = Some(provider_reference.to_string());
        paid.purchased_at = Some(now);
        paid.updated_at = now;

        let mut won = true;
        if !self.orders.compare_and_set(&paid, PaymentStatus::Pending).await? {
            let current = self.get(order_id).await?;
            match current.payment_status {
                PaymentStatus::Paid if current.provider_reference.as_deref() == Some(provider_reference) => {
                    paid = current;
                    won = false;
                }
                PaymentStatus::Paid => return Err(OrderError::PaymentReferenceMismatch { order_id }),
                status => {
                    // The hold is sold but the order settled another way.
                    error!(order_id = %order_id, status = %status, "payment confirmed for an order settled concurrently");
                    self.flag_for_reconciliation(&current, provider_reference, ReservationState::Committed)
                        .await?;
                    return Err(OrderError::ConflictingOutcome { order_id, status });
                }
            }
        }

        if won {
            info!(
                order_id = %paid.id,
                provider_reference = %provider_reference,
                quantity = paid.quantity,
                "order paid"
            );
            self.events
                .publish(EngineEvent::OrderPaid(OrderPaidEvent {
                    order_id: paid.id,
                    reservation_id: paid.reservation_id,
                    showtime_id: paid.showtime_id,
                    quantity: paid.quantity,
                    total_amount: paid.total_amount,
                    currency: paid.currency.clone(),
                    timestamp: now.timestamp(),
                }))
                .await;
        }

        let batch = self.issuer.issue(&paid).await?;
        self.announce_issued(&paid, &batch).await;

        Ok(PaymentConfirmation {
            order: paid,
            tickets: batch.tickets,
            replayed: !won,
        })
    }

    async fn replay_confirmation(
        &self,
        order: Order,
        provider_reference: &str,
    ) -> Result<PaymentConfirmation, OrderError> {
        if order.provider_reference.as_deref() != Some(provider_reference) {
            warn!(order_id = %order.id, "paid order received a confirmation with another reference");
            return Err(OrderError::PaymentReferenceMismatch { order_id: order.id });
        }

        // Re-running the issuer repairs an order that was paid but never
        // received its tickets.
        let batch = self.issuer.issue(&order).await?;
        self.announce_issued(&order, &batch).await;
        info!(order_id = %order.id, "payment confirmation replayed");

        Ok(PaymentConfirmation {
            order,
            tickets: batch.tickets,
            replayed: true,
        })
    }

    async fn announce_issued(&self, order: &Order, batch: &IssuedBatch) {
        if !batch.freshly_minted {
            return;
        }
        self.events
            .publish(EngineEvent::TicketsIssued(TicketsIssuedEvent {
                order_id: order.id,
                showtime_id: order.showtime_id,
                ticket_numbers: batch.tickets.iter().map(|t| t.ticket_number.clone()).collect(),
                timestamp: self.clock.now().timestamp(),
            }))
            .await;
    }

    /// Record that the order needs manual settlement. Returns the error the
    /// caller reports; the flag itself is best effort under concurrent writes.
    async fn flag_for_reconciliation(
        &self,
        order: &Order,
        provider_reference: &str,
        reservation_state: ReservationState,
    ) -> Result<OrderError, OrderError> {
        let now = self.clock.now();
        let mut flagged = order.clone();
        flagged.reconciliation = Some(ReconciliationFlag {
            provider_reference: provider_reference.to_string(),
            reservation_state,
            flagged_at: now,
        });
        flagged.updated_at = now;

        if self.orders.compare_and_set(&flagged, order.payment_status).await? {
            warn!(
                order_id = %order.id,
                reservation_id = %order.reservation_id,
                reservation_state = %reservation_state,
                "late payment flagged for reconciliation"
            );
            self.events
                .publish(EngineEvent::ReconciliationFlagged(ReconciliationFlaggedEvent {
                    order_id: order.id,
                    reservation_id: order.reservation_id,
                    provider_reference: provider_reference.to_string(),
                    reservation_state: reservation_state.to_string(),
                    timestamp: now.timestamp(),
                }))
                .await;
        } else {
            warn!(order_id = %order.id, "order changed while being flagged for reconciliation");
        }

        Ok(OrderError::ReservationConflict {
            order_id: order.id,
            reservation_id: order.reservation_id,
            reservation_state,
        })
    }

    /// Settle a declined payment and put the held tickets back on sale.
    /// A redelivered failure for an already failed order is a no-op.
    pub async fn fail_payment(&self, order_id: Uuid, reason: &str) -> Result<Order, OrderError> {
        let order = self.get(order_id).await?;
        match order.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Failed => return Ok(order),
            from => return Err(invalid_transition(&order, from, PaymentStatus::Failed)),
        }

        let now = self.clock.now();
        let mut failed = order.clone();
        failed.payment_status = PaymentStatus::Failed;
        failed.failure_reason = Some(reason.to_string());
        failed.updated_at = now;

        if !self.orders.compare_and_set(&failed, PaymentStatus::Pending).await? {
            let current = self.get(order_id).await?;
            if current.payment_status == PaymentStatus::Failed {
                return Ok(current);
            }
            return Err(invalid_transition(&current, current.payment_status, PaymentStatus::Failed));
        }

        let reservation = self.reservation_of(&order).await?;
        let mut released_quantity = 0;
        if self
            .reservations
            .transition(reservation.id, ReservationState::Active, ReservationState::Released)
            .await?
        {
            with_backoff("release", || self.ledger.release(&reservation.hold)).await?;
            released_quantity = reservation.quantity;
        }

        info!(order_id = %order_id, reason, released_quantity, "order payment failed");
        self.events
            .publish(EngineEvent::OrderFailed(OrderFailedEvent {
                order_id,
                showtime_id: failed.showtime_id,
                released_quantity,
                reason: reason.to_string(),
                timestamp: now.timestamp(),
            }))
            .await;

        Ok(failed)
    }

    /// Refund a paid order. Every ticket it owns is cancelled, scanned ones
    /// included; the seats are not put back on sale.
    pub async fn refund(&self, order_id: Uuid) -> Result<RefundSummary, OrderError> {
        let order = self.get(order_id).await?;
        if !order.payment_status.can_transition_to(PaymentStatus::Refunded) {
            return Err(invalid_transition(&order, order.payment_status, PaymentStatus::Refunded));
        }

        let now = self.clock.now();
        let mut refunded = order.clone();
        refunded.payment_status = PaymentStatus::Refunded;
        refunded.updated_at = now;

        if !self.orders.compare_and_set(&refunded, PaymentStatus::Paid).await? {
            let current = self.get(order_id).await?;
            return Err(invalid_transition(&current, current.payment_status, PaymentStatus::Refunded));
        }

        let cancelled_tickets = self.tickets.cancel_for_order(order_id).await?;
        info!(order_id = %order_id, cancelled_tickets, "order refunded");
        self.events
            .publish(EngineEvent::OrderRefunded(OrderRefundedEvent {
                order_id,
                showtime_id: refunded.showtime_id,
                cancelled_tickets,
                timestamp: now.timestamp(),
            }))
            .await;

        Ok(RefundSummary {
            order: refunded,
            cancelled_tickets,
        })
    }

    async fn reservation_of(&self, order: &Order) -> Result<Reservation, OrderError> {
        self.reservations.get(order.reservation_id).await?.ok_or_else(|| {
            OrderError::Repository(RepositoryError::Corrupt(format!(
                "order {} references missing reservation {}",
                order.id, order.reservation_id
            )))
        })
    }
}

fn invalid_transition(order: &Order, from: PaymentStatus, to: PaymentStatus) -> OrderError {
    error!(order_id = %order.id, from = %from, to = %to, "rejected invalid order transition");
    OrderError::InvalidStateTransition {
        order_id: order.id,
        from,
        to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::CodeSigner;
    use crate::memory::{InMemoryOrderRepository, InMemoryReservationRepository, InMemoryTicketRepository};
    use crate::reservation::{ReservationError, ReservationManager};
    use crate::validator::{ScanResult, TicketValidator};
    use boxoffice_catalog::{InMemoryCatalog, InMemoryLedger};
    use boxoffice_core::catalog::ShowtimeListing;
    use boxoffice_core::clock::ManualClock;
    use boxoffice_core::events::RecordingPublisher;
    use boxoffice_core::models::TicketStatus;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    struct Harness {
        reservations: ReservationManager,
        orders: Arc<OrderLifecycle>,
        validator: TicketValidator,
        ledger: Arc<InMemoryLedger>,
        catalog: Arc<InMemoryCatalog>,
        clock: Arc<ManualClock>,
        events: Arc<RecordingPublisher>,
        showtime_id: Uuid,
    }

    async fn harness(capacity: u32) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let reservation_repo = Arc::new(InMemoryReservationRepository::new());
        let order_repo = Arc::new(InMemoryOrderRepository::new());
        let ticket_repo = Arc::new(InMemoryTicketRepository::new());
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(RecordingPublisher::new());
        let signer = Arc::new(CodeSigner::new(b"order-tests"));

        let showtime_id = Uuid::new_v4();
        catalog
            .upsert(&ShowtimeListing {
                id: showtime_id,
                capacity,
                unit_price: dec!(11.50),
                currency: "EUR".into(),
                starts_at: Utc::now() + Duration::days(1),
                closed_at: None,
            })
            .await
            .unwrap();
        ledger.set_capacity(showtime_id, capacity).await.unwrap();

        let issuer = Arc::new(TicketIssuer::new(ticket_repo.clone(), signer.clone(), clock.clone(), "BX"));
        Harness {
            reservations: ReservationManager::new(
                ledger.clone(),
                catalog.clone(),
                reservation_repo.clone(),
                order_repo.clone(),
                events.clone(),
                clock.clone(),
                Duration::minutes(10),
            ),
            orders: Arc::new(OrderLifecycle::new(
                ledger.clone(),
                catalog.clone(),
                reservation_repo,
                order_repo,
                ticket_repo.clone(),
                issuer,
                events.clone(),
                clock.clone(),
            )),
            validator: TicketValidator::new(ticket_repo, signer, events.clone(), clock.clone()),
            ledger,
            catalog,
            clock,
            events,
            showtime_id,
        }
    }

    fn guest() -> Buyer {
        Buyer::Guest {
            email: "guest@example.com".to_string().into(),
            name: Some("Guest".into()),
        }
    }

    async fn pending_order(h: &Harness, quantity: u32) -> Order {
        let reservation = h.reservations.reserve(h.showtime_id, quantity, None).await.unwrap();
        h.orders
            .create(NewOrder {
                reservation_id: reservation.id,
                buyer: guest(),
                expected_total: None,
                payment_method: Some("card".into()),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_prices_from_listing() {
        let h = harness(10).await;
        let order = pending_order(&h, 3).await;

        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.total_amount, dec!(34.50));
        assert_eq!(order.currency, "EUR");
    }

    #[tokio::test]
    async fn test_create_rejects_stale_total_and_second_order() {
        let h = harness(10).await;
        let reservation = h.reservations.reserve(h.showtime_id, 2, None).await.unwrap();
        let request = NewOrder {
            reservation_id: reservation.id,
            buyer: guest(),
            expected_total: Some(dec!(20.00)),
            payment_method: None,
        };
        assert!(matches!(
            h.orders.create(request.clone()).await,
            Err(OrderError::Validation(_))
        ));

        let request = NewOrder {
            expected_total: Some(dec!(23)),
            ..request
        };
        h.orders.create(request.clone()).await.unwrap();
        assert!(matches!(
            h.orders.create(request).await,
            Err(OrderError::ReservationAlreadyOrdered(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_showtime_refuses_orders() {
        let h = harness(4).await;
        let reservation = h.reservations.reserve(h.showtime_id, 2, None).await.unwrap();

        let mut listing = h.catalog.get(h.showtime_id).await.unwrap().unwrap();
        listing.closed_at = Some(h.clock.now());
        h.catalog.upsert(&listing).await.unwrap();

        let err = h
            .orders
            .create(NewOrder {
                reservation_id: reservation.id,
                buyer: guest(),
                expected_total: None,
                payment_method: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::ShowtimeClosed(id) if id == h.showtime_id));

        h.clock.advance(Duration::minutes(11));
        assert_eq!(h.reservations.expire_sweep().await.unwrap().expired, 1);
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_held, 0);
    }

    #[tokio::test]
    async fn test_create_after_ttl_is_expired_or_missing() {
        let h = harness(10).await;
        let reservation = h.reservations.reserve(h.showtime_id, 1, None).await.unwrap();
        h.clock.advance(Duration::minutes(11));

        let result = h
            .orders
            .create(NewOrder {
                reservation_id: reservation.id,
                buyer: guest(),
                expected_total: None,
                payment_method: None,
            })
            .await;
        assert!(matches!(result, Err(OrderError::ReservationExpiredOrMissing(_))));
    }

    #[tokio::test]
    async fn test_confirm_issues_tickets_and_sells_capacity() {
        let h = harness(10).await;
        let order = pending_order(&h, 2).await;

        let confirmation = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();

        assert!(!confirmation.replayed);
        assert_eq!(confirmation.order.payment_status, PaymentStatus::Paid);
        assert_eq!(confirmation.tickets.len(), 2);
        assert!(confirmation.tickets.iter().all(|t| t.price == dec!(11.50)));

        let availability = h.ledger.availability(h.showtime_id).await.unwrap();
        assert_eq!(availability.tickets_sold, 2);
        assert_eq!(availability.tickets_held, 0);
        assert_eq!(
            h.events.names().await,
            vec!["reservation.created", "order.paid", "tickets.issued"]
        );
    }

    #[tokio::test]
    async fn test_confirm_twice_yields_one_batch() {
        let h = harness(10).await;
        let order = pending_order(&h, 3).await;

        let first = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();
        let second = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.tickets, second.tickets);
        assert_eq!(h.orders.tickets(order.id).await.unwrap().len(), 3);
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_sold, 3);
        assert!(matches!(
            h.orders.confirm_payment(order.id, "pay_2").await,
            Err(OrderError::PaymentReferenceMismatch { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeliveries_issue_once() {
        let h = harness(10).await;
        let order = pending_order(&h, 2).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orders = h.orders.clone();
                tokio::spawn(async move { orders.confirm_payment(order.id, "pay_1").await.unwrap() })
            })
            .collect();

        let mut fresh = 0;
        for handle in handles {
            let confirmation = handle.await.unwrap();
            assert_eq!(confirmation.tickets.len(), 2);
            if !confirmation.replayed {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(h.orders.tickets(order.id).await.unwrap().len(), 2);
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_sold, 2);
    }

    #[tokio::test]
    async fn test_illegal_transitions_leave_order_unchanged() {
        let h = harness(10).await;
        let pending = pending_order(&h, 1).await;

        assert!(matches!(
            h.orders.refund(pending.id).await,
            Err(OrderError::InvalidStateTransition {
                from: PaymentStatus::Pending,
                to: PaymentStatus::Refunded,
                ..
            })
        ));
        assert_eq!(h.orders.get(pending.id).await.unwrap(), pending);

        let failed = h.orders.fail_payment(pending.id, "card declined").await.unwrap();
        assert!(matches!(
            h.orders.confirm_payment(pending.id, "pay_1").await,
            Err(OrderError::InvalidStateTransition {
                from: PaymentStatus::Failed,
                to: PaymentStatus::Paid,
                ..
            })
        ));
        assert_eq!(h.orders.get(pending.id).await.unwrap(), failed);

        let paid = pending_order(&h, 1).await;
        h.orders.confirm_payment(paid.id, "pay_2").await.unwrap();
        assert!(matches!(
            h.orders.fail_payment(paid.id, "late decline").await,
            Err(OrderError::InvalidStateTransition {
                from: PaymentStatus::Paid,
                to: PaymentStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_payment_releases_hold_immediately() {
        let h = harness(4).await;
        let order = pending_order(&h, 3).await;
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 1);

        let failed = h.orders.fail_payment(order.id, "insufficient funds").await.unwrap();
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 4);

        let replay = h.orders.fail_payment(order.id, "insufficient funds").await.unwrap();
        assert_eq!(replay, failed);
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 4);
    }

    #[tokio::test]
    async fn test_late_payment_after_expiry_is_flagged() {
        let h = harness(5).await;
        let order = pending_order(&h, 2).await;

        h.clock.advance(Duration::minutes(15));
        assert_eq!(h.reservations.expire_sweep().await.unwrap().expired, 1);

        let err = h.orders.confirm_payment(order.id, "pay_late").await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::ReservationConflict {
                reservation_state: ReservationState::Expired,
                ..
            }
        ));

        let flagged = h.orders.flagged().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, order.id);
        assert_eq!(flagged[0].payment_status, PaymentStatus::Pending);
        assert_eq!(
            flagged[0].reconciliation.as_ref().map(|f| f.provider_reference.as_str()),
            Some("pay_late")
        );
        assert!(h.orders.tickets(order.id).await.unwrap().is_empty());
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 5);

        // A redelivery reports the same conflict and does not flag twice.
        assert!(matches!(
            h.orders.confirm_payment(order.id, "pay_late").await,
            Err(OrderError::ReservationConflict { .. })
        ));
        let names = h.events.names().await;
        assert_eq!(names.iter().filter(|n| **n == "order.reconciliation_flagged").count(), 1);
    }

    #[tokio::test]
    async fn test_unswept_reservation_can_still_be_paid() {
        let h = harness(5).await;
        let order = pending_order(&h, 1).await;
        h.clock.advance(Duration::minutes(15));

        let confirmation = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();
        assert_eq!(confirmation.tickets.len(), 1);
        assert_eq!(h.reservations.expire_sweep().await.unwrap().expired, 0);
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn test_refund_cancels_every_ticket() {
        let h = harness(10).await;
        let order = pending_order(&h, 2).await;
        let confirmation = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();

        let used = &confirmation.tickets[0];
        assert!(h.validator.scan(used.code.expose(), None).await.unwrap().is_admitted());

        let summary = h.orders.refund(order.id).await.unwrap();
        assert_eq!(summary.order.payment_status, PaymentStatus::Refunded);
        assert_eq!(summary.cancelled_tickets, 2);

        let tickets = h.orders.tickets(order.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
        let used_after = tickets.iter().find(|t| t.id == used.id).unwrap();
        assert!(used_after.scanned_at.is_some());

        // Refunds do not return capacity.
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_sold, 2);
        assert!(matches!(
            h.validator.scan(confirmation.tickets[1].code.expose(), None).await.unwrap(),
            ScanResult::Cancelled { .. }
        ));
    }

    #[tokio::test]
    async fn test_capacity_two_walkthrough() {
        let h = harness(2).await;

        let order = pending_order(&h, 2).await;
        assert!(matches!(
            h.reservations.reserve(h.showtime_id, 1, None).await,
            Err(ReservationError::Inventory(LedgerError::InsufficientInventory { .. }))
        ));

        let confirmation = h.orders.confirm_payment(order.id, "pay_1").await.unwrap();
        assert_eq!(confirmation.tickets.len(), 2);
        assert_ne!(confirmation.tickets[0].ticket_number, confirmation.tickets[1].ticket_number);

        let code = confirmation.tickets[0].code.expose();
        assert!(h.validator.scan(code, None).await.unwrap().is_admitted());
        assert!(matches!(
            h.validator.scan(code, None).await.unwrap(),
            ScanResult::AlreadyUsed { .. }
        ));

        let availability = h.ledger.availability(h.showtime_id).await.unwrap();
        assert_eq!(availability.tickets_sold, 2);
        assert_eq!(availability.tickets_available, 0);

        let summary = h.orders.refund(order.id).await.unwrap();
        assert_eq!(summary.cancelled_tickets, 2);
        for ticket in &confirmation.tickets {
            assert!(matches!(
                h.validator.scan(ticket.code.expose(), None).await.unwrap(),
                ScanResult::Cancelled { .. }
            ));
        }
        assert_eq!(h.ledger.availability(h.showtime_id).await.unwrap().tickets_available, 0);
    }
}
