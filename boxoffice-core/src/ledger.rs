use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proof of a successful `try_hold`. The ledger recognises a hold by `id`;
/// `showtime_id` and `quantity` are carried so callers never re-derive them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HoldToken {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
}

impl HoldToken {
    pub fn new(showtime_id: Uuid, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            showtime_id,
            quantity,
        }
    }
}

/// Point-in-time view of a showtime's counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    pub showtime_id: Uuid,
    pub capacity: u32,
    pub tickets_sold: u32,
    pub tickets_held: u32,
    pub tickets_available: u32,
}

impl Availability {
    pub fn new(showtime_id: Uuid, capacity: u32, tickets_sold: u32, tickets_held: u32) -> Self {
        Self {
            showtime_id,
            capacity,
            tickets_sold,
            tickets_held,
            tickets_available: capacity.saturating_sub(tickets_sold + tickets_held),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient inventory for showtime {showtime_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        showtime_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(Uuid),

    #[error("Hold not found: {0}")]
    UnknownHold(Uuid),

    #[error("Hold {0} was released and can no longer be committed")]
    HoldReleased(Uuid),

    #[error("Hold {0} was committed and can no longer be released")]
    HoldCommitted(Uuid),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Capacity {requested} for showtime {showtime_id} is below the {in_use} tickets sold or held")]
    CapacityBelowUsage {
        showtime_id: Uuid,
        requested: u32,
        in_use: u32,
    },

    #[error("Ledger storage unavailable: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Transient faults are retried by the caller; everything else is a
    /// definitive answer from the ledger.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

/// The authoritative counter store for showtime capacity.
///
/// All mutation of sold/held counters goes through these operations.
/// `try_hold` must check and reserve as one indivisible step per showtime;
/// `commit` and `release` are idempotent for the same token.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Create the counters for a showtime or change its capacity.
    async fn set_capacity(&self, showtime_id: Uuid, capacity: u32) -> Result<Availability, LedgerError>;

    async fn try_hold(&self, showtime_id: Uuid, quantity: u32) -> Result<HoldToken, LedgerError>;

    async fn commit(&self, token: &HoldToken) -> Result<(), LedgerError>;

    async fn release(&self, token: &HoldToken) -> Result<(), LedgerError>;

    async fn availability(&self, showtime_id: Uuid) -> Result<Availability, LedgerError>;
}
