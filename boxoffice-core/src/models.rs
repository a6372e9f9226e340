use boxoffice_shared::Masked;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ledger::HoldToken;
use crate::payment::PaymentStatus;
use crate::CoreError;

/// Reservation state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Active,
    Committed,
    Released,
    Expired,
}

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Active => "ACTIVE",
            ReservationState::Committed => "COMMITTED",
            ReservationState::Released => "RELEASED",
            ReservationState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationState::Active),
            "COMMITTED" => Ok(ReservationState::Committed),
            "RELEASED" => Ok(ReservationState::Released),
            "EXPIRED" => Ok(ReservationState::Expired),
            other => Err(CoreError::ValidationError(format!("unknown reservation state {other}"))),
        }
    }
}

/// A time-boxed claim on showtime capacity, owned by at most one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub hold: HoldToken,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(hold: HoldToken, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            showtime_id: hold.showtime_id,
            quantity: hold.quantity,
            hold,
            state: ReservationState::Active,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Who is buying: a registered account or a guest checkout contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Buyer {
    Registered {
        user_id: String,
    },
    Guest {
        email: Masked<String>,
        name: Option<String>,
    },
}

impl Buyer {
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Buyer::Registered { user_id } if user_id.trim().is_empty() => Err(
                CoreError::ValidationError("registered buyer needs a user id".to_string()),
            ),
            Buyer::Guest { email, .. } if !email.expose().contains('@') => Err(
                CoreError::ValidationError("guest buyer needs a contact email".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Recorded when a payment arrives for a reservation that no longer holds
/// capacity. Resolved by an operator, never automatically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationFlag {
    pub provider_reference: String,
    pub reservation_state: ReservationState,
    pub flagged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub showtime_id: Uuid,
    pub quantity: u32,
    pub buyer: Buyer,
    pub currency: String,
    pub total_amount: Decimal,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub reconciliation: Option<ReconciliationFlag>,
    pub created_at: DateTime<Utc>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        reservation: &Reservation,
        buyer: Buyer,
        total_amount: Decimal,
        currency: String,
        payment_method: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            showtime_id: reservation.showtime_id,
            quantity: reservation.quantity,
            buyer,
            currency,
            total_amount,
            payment_method,
            payment_status: PaymentStatus::Pending,
            provider_reference: None,
            failure_reason: None,
            reconciliation: None,
            created_at: now,
            purchased_at: None,
            updated_at: now,
        }
    }

    /// Price of a single ticket. Totals always divide evenly because they are
    /// built as `unit_price * quantity`.
    pub fn unit_price(&self) -> Decimal {
        if self.quantity == 0 {
            Decimal::ZERO
        } else {
            self.total_amount / Decimal::from(self.quantity)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Valid,
    Scanned,
    Cancelled,
    Expired,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Valid => "VALID",
            TicketStatus::Scanned => "SCANNED",
            TicketStatus::Cancelled => "CANCELLED",
            TicketStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(TicketStatus::Valid),
            "SCANNED" => Ok(TicketStatus::Scanned),
            "CANCELLED" => Ok(TicketStatus::Cancelled),
            "EXPIRED" => Ok(TicketStatus::Expired),
            other => Err(CoreError::ValidationError(format!("unknown ticket status {other}"))),
        }
    }
}

/// An admission ticket. Never deleted; retired through `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub price: Decimal,
    pub code: Masked<String>,
    pub status: TicketStatus,
    pub scanned_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reservation_expiry_is_absolute() {
        let now = Utc::now();
        let hold = HoldToken::new(Uuid::new_v4(), 2);
        let reservation = Reservation::new(hold, Duration::minutes(10), now);

        assert!(reservation.is_active());
        assert_eq!(reservation.quantity, 2);
        assert!(!reservation.is_past_expiry(now + Duration::minutes(9)));
        assert!(reservation.is_past_expiry(now + Duration::minutes(10)));
    }

    #[test]
    fn test_buyer_validation() {
        assert!(Buyer::Registered { user_id: "u-1".into() }.validate().is_ok());
        assert!(Buyer::Registered { user_id: " ".into() }.validate().is_err());
        assert!(Buyer::Guest { email: Masked::new("no-at-sign".into()), name: None }
            .validate()
            .is_err());
    }

    #[test]
    fn test_order_unit_price() {
        let reservation = Reservation::new(HoldToken::new(Uuid::new_v4(), 3), Duration::minutes(10), Utc::now());
        let order = Order::new(
            &reservation,
            Buyer::Registered { user_id: "u-1".into() },
            dec!(37.50),
            "EUR".into(),
            None,
            Utc::now(),
        );

        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.unit_price(), dec!(12.50));
    }

    #[test]
    fn test_guest_email_is_masked_in_debug_output() {
        let buyer = Buyer::Guest {
            email: Masked::new("guest@example.com".into()),
            name: Some("Ada".into()),
        };
        assert!(!format!("{:?}", buyer).contains("guest@example.com"));
    }
}
