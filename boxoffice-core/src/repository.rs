use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Order, Reservation, ReservationState, Ticket};
use crate::payment::PaymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Storage(_))
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository trait for reservation records
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn insert(&self, reservation: &Reservation) -> RepoResult<()>;

    async fn get(&self, id: Uuid) -> RepoResult<Option<Reservation>>;

    /// Move a reservation from `from` to `to` only if it is still in `from`.
    /// Returns `false` when another writer got there first.
    async fn transition(
        &self,
        id: Uuid,
        from: ReservationState,
        to: ReservationState,
    ) -> RepoResult<bool>;

    /// Active reservations whose expiry is at or before `now`, oldest first.
    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Reservation>>;
}

/// Repository trait for order records
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `Duplicate` if the reservation already belongs to an order.
    async fn insert(&self, order: &Order) -> RepoResult<()>;

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>>;

    async fn find_by_reservation(&self, reservation_id: Uuid) -> RepoResult<Option<Order>>;

    /// Overwrite the stored order with `order` only if its stored payment
    /// status is still `expected`.
    async fn compare_and_set(&self, order: &Order, expected: PaymentStatus) -> RepoResult<bool>;

    /// Orders carrying a reconciliation flag, oldest flag first.
    async fn list_flagged(&self) -> RepoResult<Vec<Order>>;
}

/// Result of storing a ticket batch for an order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchInsert {
    Inserted(Vec<Ticket>),
    /// The order already owned tickets; nothing was written.
    AlreadyIssued(Vec<Ticket>),
}

impl BatchInsert {
    pub fn into_tickets(self) -> Vec<Ticket> {
        match self {
            BatchInsert::Inserted(tickets) | BatchInsert::AlreadyIssued(tickets) => tickets,
        }
    }
}

/// Repository trait for tickets. The authoritative store for scannable codes.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Reserve `count` ticket numbers that will never be handed out again.
    async fn allocate_numbers(&self, count: u32) -> RepoResult<Vec<u64>>;

    /// Store the batch as the order's tickets unless the order already owns
    /// tickets. Check and insert happen atomically.
    async fn insert_batch(&self, order_id: Uuid, tickets: &[Ticket]) -> RepoResult<BatchInsert>;

    async fn get(&self, id: Uuid) -> RepoResult<Option<Ticket>>;

    async fn list_for_order(&self, order_id: Uuid) -> RepoResult<Vec<Ticket>>;

    async fn find_by_code(&self, code: &str) -> RepoResult<Option<Ticket>>;

    /// `Valid → Scanned` as a compare-and-swap. Returns `false` if the ticket
    /// was not `Valid` at the time of the write.
    async fn mark_scanned(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool>;

    /// Refund: every `Valid` or `Scanned` ticket of the order becomes
    /// `Cancelled`, keeping `scanned_at`. Returns the number moved.
    async fn cancel_for_order(&self, order_id: Uuid) -> RepoResult<u32>;

    /// `Valid → Expired` for every ticket of the showtime. Returns the number moved.
    async fn expire_for_showtime(&self, showtime_id: Uuid) -> RepoResult<u32>;
}
