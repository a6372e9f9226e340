pub mod app_config;
pub mod backend;
pub mod catalog_repo;
pub mod database;
pub mod events;
pub mod ledger;
pub mod order_repo;
pub mod reservation_repo;
pub mod ticket_repo;

pub use app_config::{Config, StorageBackend};
pub use backend::Storage;
pub use database::DbClient;
pub use events::BroadcastPublisher;
