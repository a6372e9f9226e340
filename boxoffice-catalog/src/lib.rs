pub mod inventory;
pub mod listings;
pub mod pricing;

pub use inventory::{InMemoryLedger, ShowtimeInventory};
pub use listings::InMemoryCatalog;
pub use pricing::{quote, PricingError, Quote};
