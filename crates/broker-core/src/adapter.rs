//! Adapter contract
//!
//! Each backend engine implements [`Adapter`] independently. The registry only ever sees
//! the trait object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::OperationContext;
use crate::error::Result;
use crate::tenant::TenantName;

/// A tenant's provisioned resource on one backend
pub trait Instance: Send + Sync + fmt::Debug {
    /// Tenant owning this instance
    fn tenant_name(&self) -> &str;

    /// Connection URI authenticating as the tenant's restricted identity
    fn connection_uri(&self) -> String;

    /// Structured description returned to API callers
    fn describe(&self) -> InstanceDescription;
}

/// The backend-specific resource a tenant was given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceIdentifier {
    /// Database name on the relational engine
    Database(String),
    /// Key namespace on the key-value engine
    Namespace(String),
}

impl ResourceIdentifier {
    pub fn name(&self) -> &str {
        match self {
            ResourceIdentifier::Database(name) | ResourceIdentifier::Namespace(name) => name,
        }
    }
}

/// Serialized view of an [`Instance`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance: String,
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub resource: ResourceIdentifier,
    pub username: String,
    pub password: String,
    pub uri: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for InstanceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDescription")
            .field("instance", &self.instance)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("resource", &self.resource)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Provisioning contract implemented once per backend engine.
///
/// Implementations must tolerate arbitrary concurrent calls and rely on the engine's own
/// atomic primitives to resolve creation races for the same tenant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Names of all tenants provisioned on this backend, read from durable state
    async fn list_instance_names(&self, ctx: &OperationContext) -> Result<Vec<String>>;

    /// Return the tenant's existing instance, or provision and return a new one.
    ///
    /// An existing record is returned unchanged. A returned instance always refers to a
    /// resource that already exists on the backend.
    async fn get_or_create_instance(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
    ) -> Result<Box<dyn Instance>>;
}
