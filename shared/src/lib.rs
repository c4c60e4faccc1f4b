pub mod database;
pub mod models;
pub mod config;
pub mod error;
pub mod entity;

pub use database::get_db_connection;
pub use config::{Config, StoreBackend, PlacementMode, LogFormat};
pub use error::EngineError;
pub use models::*;
