use boxoffice_core::clock::Clock;
use boxoffice_core::models::{Order, Ticket, TicketStatus};
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{BatchInsert, RepositoryError, TicketRepository};
use boxoffice_shared::Masked;
use rand::RngCore;
use ring::hmac;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const NONCE_LEN: usize = 16;

/// Mints and checks scannable ticket codes.
///
/// A code is `{ticket_number}.{nonce}.{tag}` where `nonce` is random and
/// `tag = HMAC-SHA256("{ticket_number}.{nonce}", secret)`, both base64. Knowing
/// a ticket number, or any number of valid codes, does not let anyone produce
/// another valid code.
pub struct CodeSigner {
    key: hmac::Key,
}

impl CodeSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn mint(&self, ticket_number: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!(
            "{}.{}",
            ticket_number,
            fast32::base64::RFC4648_NOPAD.encode(&nonce)
        );
        let tag = hmac::sign(&self.key, payload.as_bytes());
        format!(
            "{}.{}",
            payload,
            fast32::base64::RFC4648_NOPAD.encode(tag.as_ref())
        )
    }

    /// `true` only for codes this signer minted.
    pub fn verify(&self, code: &str) -> bool {
        let Some((payload, tag)) = code.rsplit_once('.') else {
            return false;
        };
        if !payload.contains('.') {
            return false;
        }
        let Ok(tag) = fast32::base64::RFC4648_NOPAD.decode_str(tag) else {
            return false;
        };
        hmac::verify(&self.key, payload.as_bytes(), &tag).is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("Order {order_id} is {status}, tickets are only issued for paid orders")]
    OrderNotPaid { order_id: Uuid, status: PaymentStatus },

    #[error("Allocated {allocated} ticket numbers for an order of {expected}")]
    NumberAllocation { expected: u32, allocated: usize },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IssuanceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IssuanceError::Repository(e) if e.is_transient())
    }
}

/// The ticket batch that belongs to an order after `issue` returns.
#[derive(Debug, Clone)]
pub struct IssuedBatch {
    pub tickets: Vec<Ticket>,
    /// `false` when the order already owned tickets and nothing new was minted.
    pub freshly_minted: bool,
}

/// Mints one ticket per purchased unit of a paid order.
pub struct TicketIssuer {
    tickets: Arc<dyn TicketRepository>,
    signer: Arc<CodeSigner>,
    clock: Arc<dyn Clock>,
    number_prefix: String,
}

impl TicketIssuer {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        signer: Arc<CodeSigner>,
        clock: Arc<dyn Clock>,
        number_prefix: impl Into<String>,
    ) -> Self {
        Self {
            tickets,
            signer,
            clock,
            number_prefix: number_prefix.into(),
        }
    }

    /// Issue the order's tickets. Calling this again for the same order
    /// returns the batch that already exists instead of minting a second one.
    pub async fn issue(&self, order: &Order) -> Result<IssuedBatch, IssuanceError> {
        if order.payment_status != PaymentStatus::Paid {
            return Err(IssuanceError::OrderNotPaid {
                order_id: order.id,
                status: order.payment_status,
            });
        }

        let existing = self.tickets.list_for_order(order.id).await?;
        if !existing.is_empty() {
            debug!(order_id = %order.id, count = existing.len(), "duplicate issuance suppressed");
            return Ok(IssuedBatch {
                tickets: existing,
                freshly_minted: false,
            });
        }

        let numbers = self.tickets.allocate_numbers(order.quantity).await?;
        if numbers.len() != order.quantity as usize {
            return Err(IssuanceError::NumberAllocation {
                expected: order.quantity,
                allocated: numbers.len(),
            });
        }

        let now = self.clock.now();
        let price = order.unit_price();
        let batch: Vec<Ticket> = numbers
            .into_iter()
            .map(|n| {
                let ticket_number = self.format_number(n);
                Ticket {
                    id: Uuid::new_v4(),
                    code: Masked::new(self.signer.mint(&ticket_number)),
                    ticket_number,
                    order_id: order.id,
                    showtime_id: order.showtime_id,
                    price,
                    status: TicketStatus::Valid,
                    scanned_at: None,
                    issued_at: now,
                }
            })
            .collect();

        match self.tickets.insert_batch(order.id, &batch).await? {
            BatchInsert::Inserted(tickets) => {
                info!(order_id = %order.id, count = tickets.len(), "tickets issued");
                Ok(IssuedBatch {
                    tickets,
                    freshly_minted: true,
                })
            }
            BatchInsert::AlreadyIssued(tickets) => {
                debug!(order_id = %order.id, "concurrent issuance won, discarding minted batch");
                Ok(IssuedBatch {
                    tickets,
                    freshly_minted: false,
                })
            }
        }
    }

    fn format_number(&self, n: u64) -> String {
        format!("{}-{:010}", self.number_prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTicketRepository;
    use boxoffice_core::clock::SystemClock;
    use boxoffice_core::ledger::HoldToken;
    use boxoffice_core::models::{Buyer, Reservation};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn paid_order(quantity: u32) -> Order {
        let reservation = Reservation::new(
            HoldToken::new(Uuid::new_v4(), quantity),
            Duration::minutes(10),
            Utc::now(),
        );
        let mut order = Order::new(
            &reservation,
            Buyer::Registered { user_id: "u-1".into() },
            dec!(12.50) * rust_decimal::Decimal::from(quantity),
            "EUR".into(),
            Some("card".into()),
            Utc::now(),
        );
        order.payment_status = PaymentStatus::Paid;
        order
    }

    fn issuer() -> TicketIssuer {
        TicketIssuer::new(
            Arc::new(InMemoryTicketRepository::new()),
            Arc::new(CodeSigner::new(b"test-secret")),
            Arc::new(SystemClock),
            "BX",
        )
    }

    #[test]
    fn test_minted_codes_verify_and_differ() {
        let signer = CodeSigner::new(b"test-secret");
        let a = signer.mint("BX-0000000001");
        let b = signer.mint("BX-0000000001");

        assert_ne!(a, b);
        assert!(a.starts_with("BX-0000000001."));
        assert!(signer.verify(&a));
        assert!(signer.verify(&b));
    }

    #[test]
    fn test_forged_codes_fail_verification() {
        let signer = CodeSigner::new(b"test-secret");
        let genuine = signer.mint("BX-0000000001");

        let incremented = genuine.replacen("BX-0000000001", "BX-0000000002", 1);
        assert!(!signer.verify(&incremented));
        assert!(!CodeSigner::new(b"other-secret").verify(&genuine));
        assert!(!signer.verify("BX-0000000001"));
        assert!(!signer.verify("garbage.!!!"));
    }

    #[tokio::test]
    async fn test_issue_mints_one_ticket_per_unit() {
        let issuer = issuer();
        let order = paid_order(3);

        let batch = issuer.issue(&order).await.unwrap();
        assert!(batch.freshly_minted);
        assert_eq!(batch.tickets.len(), 3);

        let numbers: HashSet<_> = batch.tickets.iter().map(|t| t.ticket_number.clone()).collect();
        let codes: HashSet<_> = batch.tickets.iter().map(|t| t.code.expose().clone()).collect();
        assert_eq!(numbers.len(), 3);
        assert_eq!(codes.len(), 3);
        assert!(batch.tickets.iter().all(|t| t.price == dec!(12.50)));
        assert!(batch.tickets.iter().all(|t| t.status == TicketStatus::Valid));
    }

    #[tokio::test]
    async fn test_issue_twice_returns_the_same_batch() {
        let issuer = issuer();
        let order = paid_order(2);

        let first = issuer.issue(&order).await.unwrap();
        let second = issuer.issue(&order).await.unwrap();

        assert!(!second.freshly_minted);
        assert_eq!(first.tickets, second.tickets);
    }

    #[tokio::test]
    async fn test_concurrent_issue_produces_one_batch() {
        let issuer = Arc::new(issuer());
        let order = paid_order(2);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let issuer = issuer.clone();
                let order = order.clone();
                tokio::spawn(async move { issuer.issue(&order).await.unwrap() })
            })
            .collect();

        let mut minted = 0;
        let mut ids = HashSet::new();
        for handle in handles {
            let batch = handle.await.unwrap();
            if batch.freshly_minted {
                minted += 1;
            }
            ids.extend(batch.tickets.into_iter().map(|t| t.id));
        }
        assert_eq!(minted, 1);
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_unpaid_order_gets_no_tickets() {
        let issuer = issuer();
        let mut order = paid_order(1);
        order.payment_status = PaymentStatus::Pending;

        assert!(matches!(
            issuer.issue(&order).await,
            Err(IssuanceError::OrderNotPaid { .. })
        ));
    }
}
