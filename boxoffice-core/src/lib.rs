pub mod catalog;
pub mod clock;
pub mod events;
pub mod ledger;
pub mod models;
pub mod payment;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{Availability, HoldToken, InventoryLedger, LedgerError};
pub use models::{Buyer, Order, ReconciliationFlag, Reservation, ReservationState, Ticket, TicketStatus};
pub use payment::PaymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
