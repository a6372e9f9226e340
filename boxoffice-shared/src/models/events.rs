use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReservationCreatedEvent {
    pub reservation_id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub expires_at: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReservationExpiredEvent {
    pub reservation_id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub reservation_id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub total_amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OrderFailedEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub released_quantity: u32,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OrderRefundedEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub cancelled_tickets: u32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct TicketsIssuedEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub ticket_numbers: Vec<String>,
    pub timestamp: i64,
}

/// Carries the ticket number only; the scannable code stays in the ticket store.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct TicketScannedEvent {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub showtime_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReconciliationFlaggedEvent {
    pub order_id: Uuid,
    pub reservation_id: Uuid,
    pub provider_reference: String,
    pub reservation_state: String,
    pub timestamp: i64,
}

/// Everything the engine announces on its event bus.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ReservationCreated(ReservationCreatedEvent),
    ReservationExpired(ReservationExpiredEvent),
    OrderPaid(OrderPaidEvent),
    OrderFailed(OrderFailedEvent),
    OrderRefunded(OrderRefundedEvent),
    TicketsIssued(TicketsIssuedEvent),
    TicketScanned(TicketScannedEvent),
    ReconciliationFlagged(ReconciliationFlaggedEvent),
}

impl EngineEvent {
    /// Showtime whose availability or attendance the event affects, if any.
    pub fn showtime_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::ReservationCreated(e) => Some(e.showtime_id),
            EngineEvent::ReservationExpired(e) => Some(e.showtime_id),
            EngineEvent::OrderPaid(e) => Some(e.showtime_id),
            EngineEvent::OrderFailed(e) => Some(e.showtime_id),
            EngineEvent::OrderRefunded(e) => Some(e.showtime_id),
            EngineEvent::TicketsIssued(e) => Some(e.showtime_id),
            EngineEvent::TicketScanned(e) => Some(e.showtime_id),
            EngineEvent::ReconciliationFlagged(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ReservationCreated(_) => "reservation.created",
            EngineEvent::ReservationExpired(_) => "reservation.expired",
            EngineEvent::OrderPaid(_) => "order.paid",
            EngineEvent::OrderFailed(_) => "order.failed",
            EngineEvent::OrderRefunded(_) => "order.refunded",
            EngineEvent::TicketsIssued(_) => "tickets.issued",
            EngineEvent::TicketScanned(_) => "ticket.scanned",
            EngineEvent::ReconciliationFlagged(_) => "order.reconciliation_flagged",
        }
    }
}
