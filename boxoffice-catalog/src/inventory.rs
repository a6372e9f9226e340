use async_trait::async_trait;
use boxoffice_core::ledger::{Availability, HoldToken, InventoryLedger, LedgerError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Released hold ids remembered per showtime so a repeated `release` stays a
/// no-op. Older ids are forgotten and answer `UnknownHold`.
pub const RELEASED_HOLD_MEMORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Active,
    Committed,
}

#[derive(Debug, Clone, Copy)]
struct HoldEntry {
    quantity: u32,
    state: HoldState,
}

/// Counters for one showtime plus the holds placed against it.
///
/// Active and committed holds are kept; committed ones are bounded by
/// capacity since each sold at least one ticket. Released holds move to a
/// fixed-size window.
#[derive(Debug)]
pub struct ShowtimeInventory {
    pub showtime_id: Uuid,
    pub capacity: u32,
    pub tickets_sold: u32,
    pub tickets_held: u32,
    holds: HashMap<Uuid, HoldEntry>,
    released: HashSet<Uuid>,
    released_order: VecDeque<Uuid>,
}

impl ShowtimeInventory {
    pub fn new(showtime_id: Uuid, capacity: u32) -> Self {
        Self {
            showtime_id,
            capacity,
            tickets_sold: 0,
            tickets_held: 0,
            holds: HashMap::new(),
            released: HashSet::new(),
            released_order: VecDeque::new(),
        }
    }

    /// Hold ids currently remembered, released ones included.
    pub fn retained_holds(&self) -> usize {
        self.holds.len() + self.released.len()
    }

    fn missing_hold(&self, hold_id: Uuid) -> LedgerError {
        if self.released.contains(&hold_id) {
            LedgerError::HoldReleased(hold_id)
        } else {
            LedgerError::UnknownHold(hold_id)
        }
    }

    fn remember_released(&mut self, hold_id: Uuid) {
        self.released.insert(hold_id);
        self.released_order.push_back(hold_id);
        while self.released_order.len() > RELEASED_HOLD_MEMORY {
            if let Some(oldest) = self.released_order.pop_front() {
                self.released.remove(&oldest);
            }
        }
    }

    pub fn tickets_available(&self) -> u32 {
        self.capacity
            .saturating_sub(self.tickets_sold)
            .saturating_sub(self.tickets_held)
    }

    pub fn snapshot(&self) -> Availability {
        Availability::new(self.showtime_id, self.capacity, self.tickets_sold, self.tickets_held)
    }

    fn resize(&mut self, capacity: u32) -> Result<(), LedgerError> {
        let in_use = self.tickets_sold + self.tickets_held;
        if capacity < in_use {
            return Err(LedgerError::CapacityBelowUsage {
                showtime_id: self.showtime_id,
                requested: capacity,
                in_use,
            });
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Check and reserve in one step. Callers hold the showtime lock.
    fn hold(&mut self, quantity: u32) -> Result<HoldToken, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }

        let available = self.tickets_available();
        if available < quantity {
            return Err(LedgerError::InsufficientInventory {
                showtime_id: self.showtime_id,
                requested: quantity,
                available,
            });
        }

        let token = HoldToken::new(self.showtime_id, quantity);
        self.tickets_held += quantity;
        self.holds.insert(
            token.id,
            HoldEntry {
                quantity,
                state: HoldState::Active,
            },
        );
        Ok(token)
    }

    fn commit(&mut self, hold_id: Uuid) -> Result<bool, LedgerError> {
        let Some(entry) = self.holds.get_mut(&hold_id) else {
            return Err(self.missing_hold(hold_id));
        };

        match entry.state {
            HoldState::Committed => Ok(false),
            HoldState::Active => {
                entry.state = HoldState::Committed;
                self.tickets_held -= entry.quantity;
                self.tickets_sold += entry.quantity;
                Ok(true)
            }
        }
    }

    fn release(&mut self, hold_id: Uuid) -> Result<bool, LedgerError> {
        let Some(entry) = self.holds.get(&hold_id).copied() else {
            return match self.missing_hold(hold_id) {
                LedgerError::HoldReleased(_) => Ok(false),
                other => Err(other),
            };
        };

        match entry.state {
            HoldState::Committed => Err(LedgerError::HoldCommitted(hold_id)),
            HoldState::Active => {
                self.holds.remove(&hold_id);
                self.tickets_held -= entry.quantity;
                self.remember_released(hold_id);
                Ok(true)
            }
        }
    }

    /// `sold + held <= capacity` and `held` equals the sum of active holds.
    pub fn invariant_holds(&self) -> bool {
        let active: u32 = self
            .holds
            .values()
            .filter(|h| h.state == HoldState::Active)
            .map(|h| h.quantity)
            .sum();
        active == self.tickets_held && self.tickets_sold + self.tickets_held <= self.capacity
    }
}

/// In-process ledger. Each showtime sits behind its own mutex, so holds on
/// unrelated showtimes never contend; the outer map lock is only taken for
/// writing when a showtime is first registered.
#[derive(Default)]
pub struct InMemoryLedger {
    showtimes: RwLock<HashMap<Uuid, Arc<Mutex<ShowtimeInventory>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn showtime(&self, showtime_id: Uuid) -> Result<Arc<Mutex<ShowtimeInventory>>, LedgerError> {
        self.showtimes
            .read()
            .await
            .get(&showtime_id)
            .cloned()
            .ok_or(LedgerError::ShowtimeNotFound(showtime_id))
    }

    /// Run `check` against a showtime's counters under its lock.
    pub async fn inspect<T>(
        &self,
        showtime_id: Uuid,
        check: impl FnOnce(&ShowtimeInventory) -> T,
    ) -> Result<T, LedgerError> {
        let showtime = self.showtime(showtime_id).await?;
        let inventory = showtime.lock().await;
        Ok(check(&inventory))
    }
}

#[async_trait]
impl InventoryLedger for InMemoryLedger {
    async fn set_capacity(&self, showtime_id: Uuid, capacity: u32) -> Result<Availability, LedgerError> {
        let mut showtimes = self.showtimes.write().await;
        match showtimes.get(&showtime_id) {
            Some(existing) => {
                let mut inventory = existing.lock().await;
                inventory.resize(capacity)?;
                Ok(inventory.snapshot())
            }
            None => {
                let inventory = ShowtimeInventory::new(showtime_id, capacity);
                let snapshot = inventory.snapshot();
                showtimes.insert(showtime_id, Arc::new(Mutex::new(inventory)));
                Ok(snapshot)
            }
        }
    }

    async fn try_hold(&self, showtime_id: Uuid, quantity: u32) -> Result<HoldToken, LedgerError> {
        let showtime = self.showtime(showtime_id).await?;
        let mut inventory = showtime.lock().await;
        let token = inventory.hold(quantity)?;
        debug!(
            showtime_id = %showtime_id,
            hold_id = %token.id,
            quantity,
            remaining = inventory.tickets_available(),
            "hold placed"
        );
        Ok(token)
    }

    async fn commit(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let showtime = self.showtime(token.showtime_id).await?;
        let mut inventory = showtime.lock().await;
        if inventory.commit(token.id)? {
            debug!(showtime_id = %token.showtime_id, hold_id = %token.id, "hold committed");
        }
        Ok(())
    }

    async fn release(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let showtime = self.showtime(token.showtime_id).await?;
        let mut inventory = showtime.lock().await;
        if inventory.release(token.id)? {
            debug!(showtime_id = %token.showtime_id, hold_id = %token.id, "hold released");
        }
        Ok(())
    }

    async fn availability(&self, showtime_id: Uuid) -> Result<Availability, LedgerError> {
        self.inspect(showtime_id, ShowtimeInventory::snapshot).await
    }
}
