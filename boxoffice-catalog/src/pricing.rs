use boxoffice_core::catalog::ShowtimeListing;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price of a purchase, fixed at order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub unit_price: Decimal,
    pub quantity: u32,
    pub total: Decimal,
    pub currency: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Negative unit price: {0}")]
    NegativePrice(Decimal),

    #[error("Total overflows for {quantity} x {unit_price}")]
    Overflow { unit_price: Decimal, quantity: u32 },
}

/// Total for `quantity` tickets of a listing. Decimal arithmetic only, so
/// totals never drift.
pub fn quote(listing: &ShowtimeListing, quantity: u32) -> Result<Quote, PricingError> {
    if listing.unit_price.is_sign_negative() {
        return Err(PricingError::NegativePrice(listing.unit_price));
    }

    let total = listing
        .unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or(PricingError::Overflow {
            unit_price: listing.unit_price,
            quantity,
        })?;

    Ok(Quote {
        unit_price: listing.unit_price,
        quantity,
        total,
        currency: listing.currency.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn listing(unit_price: Decimal) -> ShowtimeListing {
        ShowtimeListing {
            id: Uuid::new_v4(),
            capacity: 50,
            unit_price,
            currency: "USD".into(),
            starts_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn test_quote_is_exact() {
        let quote = quote(&listing(dec!(0.10)), 3).unwrap();
        assert_eq!(quote.total, dec!(0.30));
        assert_eq!(quote.currency, "USD");
    }

    #[test]
    fn test_negative_price_is_rejected() {
        assert_eq!(
            quote(&listing(dec!(-1)), 1),
            Err(PricingError::NegativePrice(dec!(-1)))
        );
    }
}
