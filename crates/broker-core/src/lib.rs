//! # Broker Core
//!
//! Core of the database broker:
//! - the adapter contract every backend implements
//! - the provisioning registry routing tenant requests to adapters
//! - tenant-name validation and credential generation
//! - per-operation cancellation and deadlines
//! - configuration types

pub mod adapter;
pub mod config;
pub mod context;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod tenant;

pub use adapter::{Adapter, Instance, InstanceDescription, ResourceIdentifier};
pub use config::{BrokerConfig, DragonflyConfig, PostgresConfig, ServerConfig};
pub use context::OperationContext;
pub use credentials::{random_password, random_token};
pub use error::{BoxError, BrokerError, Result};
pub use registry::Registry;
pub use tenant::TenantName;
