pub mod fulfillment;
pub mod manager;
pub mod memory;
pub mod reservation;
mod retry;
pub mod validator;

pub use fulfillment::{CodeSigner, IssuanceError, IssuedBatch, TicketIssuer};
pub use manager::{NewOrder, OrderError, OrderLifecycle, PaymentConfirmation, RefundSummary};
pub use memory::{InMemoryOrderRepository, InMemoryReservationRepository, InMemoryTicketRepository};
pub use reservation::{ReservationError, ReservationManager, SweepReport};
pub use validator::{ScanResult, TicketValidator};
