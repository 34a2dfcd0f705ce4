//! Backend adapters for the database broker
//!
//! - [`PostgresAdapter`]: one database and one restricted login role per tenant
//! - [`DragonflyAdapter`]: one ACL user confined to one key namespace per tenant

pub mod postgres;
pub mod dragonfly;

pub use postgres::{PostgresAdapter, PostgresInstance};
pub use dragonfly::{DragonflyAdapter, DragonflyInstance, KeyValueBackend, RedisBackend};

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
