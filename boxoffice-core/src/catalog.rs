use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repository::RepositoryError;

/// What the content system tells the engine about a showtime. Read-only input
/// to reservation and pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowtimeListing {
    pub id: Uuid,
    pub capacity: u32,
    pub unit_price: Decimal,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    /// Set once the showtime is over. A closed showtime sells nothing more.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ShowtimeListing {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

#[async_trait]
pub trait ShowtimeCatalog: Send + Sync {
    async fn upsert(&self, listing: &ShowtimeListing) -> Result<(), RepositoryError>;

    async fn get(&self, showtime_id: Uuid) -> Result<Option<ShowtimeListing>, RepositoryError>;
}
