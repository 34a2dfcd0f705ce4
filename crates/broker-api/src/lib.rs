//! # Broker API
//!
//! HTTP surface of the database broker: instance listing, get-or-create and connection URI
//! retrieval per backend, plus a health check.

pub mod rest;

pub use rest::router::create_router;

use broker_core::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Deadline given to each request's backend operations
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }
}
