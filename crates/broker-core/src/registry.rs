//! Provisioning registry
//!
//! Maps backend names to live adapters. Tenant-name validation and backend lookup happen
//! here, before any adapter is invoked.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapter::{Adapter, Instance};
use crate::context::OperationContext;
use crate::error::{BrokerError, Result};
use crate::tenant::TenantName;

/// Name to adapter mapping shared by all request handlers
#[derive(Default)]
pub struct Registry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `name`, returning any adapter it replaced.
    ///
    /// The same adapter may be registered under several names.
    pub fn register_adapter(
        &self,
        name: impl Into<String>,
        adapter: Arc<dyn Adapter>,
    ) -> Option<Arc<dyn Adapter>> {
        let name = name.into();
        info!(backend = %name, "Registering adapter");
        self.adapters.write().insert(name, adapter)
    }

    /// Remove the adapter registered under `name`
    pub fn unregister_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        let removed = self.adapters.write().remove(name);
        if removed.is_some() {
            info!(backend = %name, "Unregistered adapter");
        }
        removed
    }

    /// Registered backend names, sorted
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve(&self, backend: &str) -> Result<Arc<dyn Adapter>> {
        // Clone out of the lock so no guard is held across backend I/O.
        self.adapters
            .read()
            .get(backend)
            .cloned()
            .ok_or_else(|| BrokerError::AdapterNotFound(backend.to_string()))
    }

    /// List tenant instances provisioned on `backend`
    pub async fn list_instances(
        &self,
        ctx: &OperationContext,
        backend: &str,
    ) -> Result<Vec<String>> {
        let adapter = self.resolve(backend)?;
        debug!(backend = %backend, "Listing instances");
        adapter.list_instance_names(ctx).await
    }

    /// Validate `tenant`, resolve `backend` and delegate get-or-create to its adapter
    pub async fn get_or_create_instance(
        &self,
        ctx: &OperationContext,
        backend: &str,
        tenant: &str,
    ) -> Result<Box<dyn Instance>> {
        let tenant = TenantName::parse(tenant)?;
        let adapter = self.resolve(backend)?;
        debug!(backend = %backend, tenant = %tenant, "Resolving instance");
        adapter.get_or_create_instance(ctx, &tenant).await
    }
}
