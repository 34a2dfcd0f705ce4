//! Broker error types

use thiserror::Error;

/// Boxed error used as the source of backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the registry and the adapters
#[derive(Error, Debug)]
pub enum BrokerError {
    /// No adapter is registered under the requested backend name
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    /// Tenant name is malformed
    #[error("invalid instance name: {0}")]
    InvalidTenantName(String),

    /// Backend communication, serialization, or engine-reported failure
    #[error("{operation}: {source}")]
    Backend {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// The operation context was cancelled before the step completed
    #[error("{0}: operation cancelled")]
    Cancelled(String),

    /// The operation context deadline passed before the step completed
    #[error("{0}: deadline exceeded")]
    DeadlineExceeded(String),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Wrap a backend failure with the step that produced it
    pub fn backend(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrokerError::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::AdapterNotFound(_) => 404,
            BrokerError::InvalidTenantName(_) => 422,
            BrokerError::Backend { .. } => 500,
            BrokerError::Cancelled(_) => 503,
            BrokerError::DeadlineExceeded(_) => 504,
            BrokerError::Configuration(_) => 500,
        }
    }

    /// Get error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            BrokerError::AdapterNotFound(_) => "ADAPTER_NOT_FOUND",
            BrokerError::InvalidTenantName(_) => "INVALID_INSTANCE_NAME",
            BrokerError::Backend { .. } => "BACKEND_ERROR",
            BrokerError::Cancelled(_) => "CANCELLED",
            BrokerError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            BrokerError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether the caller, not the broker, is at fault
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
