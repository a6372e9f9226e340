use boxoffice_core::clock::Clock;
use boxoffice_core::events::EventPublisher;
use boxoffice_core::models::{Ticket, TicketStatus};
use boxoffice_core::repository::{RepositoryError, TicketRepository};
use boxoffice_shared::models::events::{EngineEvent, TicketScannedEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fulfillment::CodeSigner;

/// What the door scanner shows the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResult {
    Success {
        ticket_id: Uuid,
        ticket_number: String,
        scanned_at: DateTime<Utc>,
    },
    AlreadyUsed {
        ticket_number: String,
        scanned_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        ticket_number: String,
    },
    Expired {
        ticket_number: String,
    },
    /// A genuine ticket presented at the gate of another showtime. Not consumed.
    WrongShowtime {
        ticket_number: String,
        showtime_id: Uuid,
    },
    NotFound,
}

impl ScanResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ScanResult::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScanResult::Success { .. } => "success",
            ScanResult::AlreadyUsed { .. } => "already_used",
            ScanResult::Cancelled { .. } => "cancelled",
            ScanResult::Expired { .. } => "expired",
            ScanResult::WrongShowtime { .. } => "wrong_showtime",
            ScanResult::NotFound => "not_found",
        }
    }

    /// One distinct message per rejection, so staff can tell a reused code from
    /// an honest mistake.
    pub fn operator_message(&self) -> String {
        match self {
            ScanResult::Success { ticket_number, .. } => format!("Admit: ticket {ticket_number}"),
            ScanResult::AlreadyUsed {
                ticket_number,
                scanned_at: Some(at),
            } => format!("Ticket {ticket_number} was already scanned at {}", at.format("%H:%M:%S")),
            ScanResult::AlreadyUsed { ticket_number, .. } => {
                format!("Ticket {ticket_number} was already scanned")
            }
            ScanResult::Cancelled { ticket_number } => {
                format!("Ticket {ticket_number} was cancelled (refunded order)")
            }
            ScanResult::Expired { ticket_number } => {
                format!("Ticket {ticket_number} has expired")
            }
            ScanResult::WrongShowtime { ticket_number, .. } => {
                format!("Ticket {ticket_number} is for a different showtime")
            }
            ScanResult::NotFound => "Unknown ticket code".to_string(),
        }
    }

    fn rejected(ticket: &Ticket) -> Self {
        let ticket_number = ticket.ticket_number.clone();
        match ticket.status {
            TicketStatus::Cancelled => ScanResult::Cancelled { ticket_number },
            TicketStatus::Expired => ScanResult::Expired { ticket_number },
            TicketStatus::Scanned | TicketStatus::Valid => ScanResult::AlreadyUsed {
                ticket_number,
                scanned_at: ticket.scanned_at,
            },
        }
    }
}

/// Consumes scanned codes against the authoritative ticket store.
pub struct TicketValidator {
    tickets: Arc<dyn TicketRepository>,
    signer: Arc<CodeSigner>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl TicketValidator {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        signer: Arc<CodeSigner>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            signer,
            events,
            clock,
        }
    }

    /// Validate and consume `code`. `gate_showtime`, when given, is the
    /// showtime the scanning gate admits to.
    pub async fn scan(&self, code: &str, gate_showtime: Option<Uuid>) -> Result<ScanResult, RepositoryError> {
        if !self.signer.verify(code) {
            warn!("scan rejected: code failed signature check");
            return Ok(ScanResult::NotFound);
        }

        let Some(ticket) = self.tickets.find_by_code(code).await? else {
            warn!("scan rejected: signed code has no ticket");
            return Ok(ScanResult::NotFound);
        };

        if let Some(gate) = gate_showtime {
            if gate != ticket.showtime_id {
                warn!(ticket_number = %ticket.ticket_number, gate = %gate, "scan rejected: wrong showtime");
                return Ok(ScanResult::WrongShowtime {
                    ticket_number: ticket.ticket_number,
                    showtime_id: ticket.showtime_id,
                });
            }
        }

        if ticket.status != TicketStatus::Valid {
            let result = ScanResult::rejected(&ticket);
            warn!(ticket_number = %ticket.ticket_number, outcome = result.label(), "scan rejected");
            return Ok(result);
        }

        let now = self.clock.now();
        if !self.tickets.mark_scanned(ticket.id, now).await? {
            // Lost the race to another scanner; report what it left behind.
            let current = self.tickets.get(ticket.id).await?.unwrap_or(ticket);
            let result = ScanResult::rejected(&current);
            warn!(ticket_number = %current.ticket_number, outcome = result.label(), "scan rejected after concurrent update");
            return Ok(result);
        }

        info!(ticket_number = %ticket.ticket_number, showtime_id = %ticket.showtime_id, "ticket admitted");
        self.events
            .publish(EngineEvent::TicketScanned(TicketScannedEvent {
                ticket_id: ticket.id,
                ticket_number: ticket.ticket_number.clone(),
                showtime_id: ticket.showtime_id,
                timestamp: now.timestamp(),
            }))
            .await;

        Ok(ScanResult::Success {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number,
            scanned_at: now,
        })
    }
}
