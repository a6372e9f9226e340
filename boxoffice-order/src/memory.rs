//! In-process repositories. Used by tests and by the `memory` storage backend.

use async_trait::async_trait;
use boxoffice_core::models::{Order, Reservation, ReservationState, Ticket, TicketStatus};
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{
    BatchInsert, OrderRepository, RepoResult, RepositoryError, ReservationRepository,
    TicketRepository,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: RwLock<HashMap<Uuid, Reservation>>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn insert(&self, reservation: &Reservation) -> RepoResult<()> {
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&reservation.id) {
            return Err(RepositoryError::Duplicate(format!("reservation {}", reservation.id)));
        }
        reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Reservation>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationState,
        to: ReservationState,
    ) -> RepoResult<bool> {
        let mut reservations = self.reservations.write().await;
        match reservations.get_mut(&id) {
            Some(reservation) if reservation.state == from => {
                reservation.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expirable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        let mut due: Vec<Reservation> = reservations
            .values()
            .filter(|r| r.is_active() && r.is_past_expiry(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        due.truncate(limit);
        Ok(due)
    }
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<Uuid, Order>,
    by_reservation: HashMap<Uuid, Uuid>,
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    table: RwLock<OrderTable>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> RepoResult<()> {
        let mut table = self.table.write().await;
        if table.orders.contains_key(&order.id) {
            return Err(RepositoryError::Duplicate(format!("order {}", order.id)));
        }
        if table.by_reservation.contains_key(&order.reservation_id) {
            return Err(RepositoryError::Duplicate(format!(
                "order for reservation {}",
                order.reservation_id
            )));
        }
        table.by_reservation.insert(order.reservation_id, order.id);
        table.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>> {
        Ok(self.table.read().await.orders.get(&id).cloned())
    }

    async fn find_by_reservation(&self, reservation_id: Uuid) -> RepoResult<Option<Order>> {
        let table = self.table.read().await;
        Ok(table
            .by_reservation
            .get(&reservation_id)
            .and_then(|id| table.orders.get(id))
            .cloned())
    }

    async fn compare_and_set(&self, order: &Order, expected: PaymentStatus) -> RepoResult<bool> {
        let mut table = self.table.write().await;
        match table.orders.get_mut(&order.id) {
            Some(stored) if stored.payment_status == expected => {
                *stored = order.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_flagged(&self) -> RepoResult<Vec<Order>> {
        let table = self.table.read().await;
        let mut flagged: Vec<Order> = table
            .orders
            .values()
            .filter(|o| o.reconciliation.is_some())
            .cloned()
            .collect();
        flagged.sort_by_key(|o| o.reconciliation.as_ref().map(|f| f.flagged_at));
        Ok(flagged)
    }
}

/// Tickets live behind individual mutexes so scans of different tickets never
/// wait on each other. Indexes are only ever locked one at a time, except in
/// `insert_batch`, which takes `by_order`, then `tickets`, then `by_code`.
pub struct InMemoryTicketRepository {
    tickets: RwLock<HashMap<Uuid, Arc<Mutex<Ticket>>>>,
    by_order: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    by_code: RwLock<HashMap<String, Uuid>>,
    next_number: AtomicU64,
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            by_order: RwLock::new(HashMap::new()),
            by_code: RwLock::new(HashMap::new()),
            next_number: AtomicU64::new(1),
        }
    }

    async fn cell(&self, id: Uuid) -> Option<Arc<Mutex<Ticket>>> {
        self.tickets.read().await.get(&id).cloned()
    }

    async fn snapshot(&self, ids: &[Uuid]) -> Vec<Ticket> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(cell) = self.cell(*id).await {
                out.push(cell.lock().await.clone());
            }
        }
        out
    }

    async fn retire(&self, ids: &[Uuid], from: &[TicketStatus], to: TicketStatus) -> u32 {
        let mut moved = 0;
        for id in ids {
            if let Some(cell) = self.cell(*id).await {
                let mut ticket = cell.lock().await;
                if from.contains(&ticket.status) {
                    ticket.status = to;
                    moved += 1;
                }
            }
        }
        moved
    }
}

impl Default for InMemoryTicketRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn allocate_numbers(&self, count: u32) -> RepoResult<Vec<u64>> {
        let first = self.next_number.fetch_add(u64::from(count), Ordering::SeqCst);
        Ok((first..first + u64::from(count)).collect())
    }

    async fn insert_batch(&self, order_id: Uuid, tickets: &[Ticket]) -> RepoResult<BatchInsert> {
        let mut by_order = self.by_order.write().await;
        if let Some(existing) = by_order.get(&order_id) {
            let existing = existing.clone();
            drop(by_order);
            return Ok(BatchInsert::AlreadyIssued(self.snapshot(&existing).await));
        }

        let mut cells = self.tickets.write().await;
        let mut codes = self.by_code.write().await;
        if let Some(clash) = tickets.iter().find(|t| codes.contains_key(t.code.expose())) {
            return Err(RepositoryError::Duplicate(format!("ticket code for {}", clash.ticket_number)));
        }

        for ticket in tickets {
            codes.insert(ticket.code.expose().clone(), ticket.id);
            cells.insert(ticket.id, Arc::new(Mutex::new(ticket.clone())));
        }
        by_order.insert(order_id, tickets.iter().map(|t| t.id).collect());
        Ok(BatchInsert::Inserted(tickets.to_vec()))
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Ticket>> {
        match self.cell(id).await {
            Some(cell) => Ok(Some(cell.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_for_order(&self, order_id: Uuid) -> RepoResult<Vec<Ticket>> {
        let ids = self.by_order.read().await.get(&order_id).cloned().unwrap_or_default();
        Ok(self.snapshot(&ids).await)
    }

    async fn find_by_code(&self, code: &str) -> RepoResult<Option<Ticket>> {
        let id = self.by_code.read().await.get(code).copied();
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn mark_scanned(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let Some(cell) = self.cell(id).await else {
            return Ok(false);
        };
        let mut ticket = cell.lock().await;
        if ticket.status != TicketStatus::Valid {
            return Ok(false);
        }
        ticket.status = TicketStatus::Scanned;
        ticket.scanned_at = Some(at);
        Ok(true)
    }

    async fn cancel_for_order(&self, order_id: Uuid) -> RepoResult<u32> {
        let ids = self.by_order.read().await.get(&order_id).cloned().unwrap_or_default();
        Ok(self
            .retire(&ids, &[TicketStatus::Valid, TicketStatus::Scanned], TicketStatus::Cancelled)
            .await)
    }

    async fn expire_for_showtime(&self, showtime_id: Uuid) -> RepoResult<u32> {
        let cells: Vec<Arc<Mutex<Ticket>>> = self.tickets.read().await.values().cloned().collect();
        let mut moved = 0;
        for cell in cells {
            let mut ticket = cell.lock().await;
            if ticket.showtime_id == showtime_id && ticket.status == TicketStatus::Valid {
                ticket.status = TicketStatus::Expired;
                moved += 1;
            }
        }
        Ok(moved)
    }
}
