use async_trait::async_trait;
use boxoffice_core::catalog::{ShowtimeCatalog, ShowtimeListing};
use boxoffice_core::repository::RepositoryError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory showtime listings, standing in for the content system.
#[derive(Default)]
pub struct InMemoryCatalog {
    listings: RwLock<HashMap<Uuid, ShowtimeListing>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShowtimeCatalog for InMemoryCatalog {
    async fn upsert(&self, listing: &ShowtimeListing) -> Result<(), RepositoryError> {
        self.listings.write().await.insert(listing.id, listing.clone());
        Ok(())
    }

    async fn get(&self, showtime_id: Uuid) -> Result<Option<ShowtimeListing>, RepositoryError> {
        Ok(self.listings.read().await.get(&showtime_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_replaces_listing() {
        let catalog = InMemoryCatalog::new();
        let mut listing = ShowtimeListing {
            id: Uuid::new_v4(),
            capacity: 100,
            unit_price: dec!(12.00),
            currency: "EUR".into(),
            starts_at: Utc::now(),
            closed_at: None,
        };
        catalog.upsert(&listing).await.unwrap();

        listing.unit_price = dec!(14.50);
        catalog.upsert(&listing).await.unwrap();

        let stored = catalog.get(listing.id).await.unwrap().unwrap();
        assert_eq!(stored.unit_price, dec!(14.50));
        assert!(catalog.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
