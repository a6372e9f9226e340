pub mod models;
pub mod pii;

pub use models::EngineEvent;
pub use pii::Masked;
