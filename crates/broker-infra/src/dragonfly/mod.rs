//! Key-value backend adapter
//!
//! Each tenant gets an ACL user `user_<tenant>` whose key access is confined to the namespace
//! `ns_<tenant>`. The engine itself stores the tenant metadata under `instance:<tenant>`;
//! there is no separate catalog.
//!
//! Provisioning writes the record first with SETNX and `provisioned: false`, which fixes the
//! tenant's credentials once and for all. The ACL user is created next, and only then is the
//! record marked provisioned. Any caller that finds an unprovisioned record completes it with
//! the stored credentials instead of returning it, so credentials are never handed out before
//! the user exists, and a failed or abandoned attempt is finished by the next request.

mod backend;
mod instance;

pub use backend::{AclUser, KeyValueBackend, RedisBackend};
pub use instance::DragonflyInstance;

use async_trait::async_trait;
use broker_core::endpoint::{uri_host_port, REDIS_DEFAULT_PORT};
use broker_core::{
    random_password, Adapter, BrokerError, DragonflyConfig, Instance, OperationContext, TenantName,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{InfraError, Result};
use instance::InstanceRecord;

/// Prefix of metadata keys
const INSTANCE_KEY_PREFIX: &str = "instance:";

pub struct DragonflyAdapter {
    backend: Arc<dyn KeyValueBackend>,
    host: String,
    port: u16,
}

impl DragonflyAdapter {
    /// Connect to the engine named by `config`
    pub async fn connect(config: &DragonflyConfig) -> Result<Self> {
        let uri = config
            .resolved_uri()
            .map_err(|e| InfraError::Configuration(e.to_string()))?;
        let (host, port) = uri_host_port(&uri, REDIS_DEFAULT_PORT)
            .map_err(|e| InfraError::Configuration(format!("parse dragonfly uri: {}", e)))?;

        info!(host = %host, port = port, "Connecting to Dragonfly");

        let backend = RedisBackend::connect(&uri).await?;
        Ok(Self::with_backend(Arc::new(backend), host, port))
    }

    /// Build an adapter over any [`KeyValueBackend`]; `host`/`port` are reported to tenants
    pub fn with_backend(backend: Arc<dyn KeyValueBackend>, host: impl Into<String>, port: u16) -> Self {
        Self {
            backend,
            host: host.into(),
            port,
        }
    }

    async fn read_record(
        &self,
        ctx: &OperationContext,
        key: &str,
    ) -> broker_core::Result<Option<InstanceRecord>> {
        let Some(raw) = ctx.run("get instance data", self.backend.get(key)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw)
            .map_err(|e| BrokerError::backend("decode instance data", InfraError::from(e)))?;
        Ok(Some(record))
    }

    /// Reserve the tenant's credentials, returning whichever record won the SETNX
    async fn reserve_record(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
        key: &str,
    ) -> broker_core::Result<InstanceRecord> {
        let record = InstanceRecord {
            namespace: namespace_name(tenant),
            username: user_name(tenant),
            password: random_password(),
            created_at: Utc::now(),
            provisioned: false,
        };

        let won = ctx
            .run("save instance data", self.backend.set_if_absent(key, &encode(&record)?))
            .await?;
        if won {
            return Ok(record);
        }

        debug!(tenant = %tenant, "Lost instance data race, reading winner");
        self.read_record(ctx, key).await?.ok_or_else(|| {
            BrokerError::backend(
                "get instance data",
                InfraError::Internal(format!("instance {} vanished after conflict", tenant)),
            )
        })
    }

    /// Create the ACL user for a reserved record, then mark the record provisioned.
    ///
    /// Safe to run from several callers at once: they all issue the same ACL directive and
    /// write the same record.
    async fn complete_record(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
        key: &str,
        mut record: InstanceRecord,
    ) -> broker_core::Result<InstanceRecord> {
        let user = AclUser {
            username: record.username.clone(),
            password: record.password.clone(),
            namespace: record.namespace.clone(),
        };
        ctx.run("create user", self.backend.create_acl_user(&user))
            .await?;

        record.provisioned = true;
        ctx.run("save instance data", self.backend.set(key, &encode(&record)?))
            .await?;

        info!(
            tenant = %tenant,
            namespace = %record.namespace,
            user = %record.username,
            "Provisioned Dragonfly instance"
        );
        Ok(record)
    }
}

#[async_trait]
impl Adapter for DragonflyAdapter {
    async fn list_instance_names(&self, ctx: &OperationContext) -> broker_core::Result<Vec<String>> {
        let pattern = format!("{}*", INSTANCE_KEY_PREFIX);
        let keys = ctx
            .run("iterate instances", self.backend.scan(&pattern))
            .await?;

        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(INSTANCE_KEY_PREFIX))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_or_create_instance(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
    ) -> broker_core::Result<Box<dyn Instance>> {
        let key = instance_key(tenant);

        let mut record = match self.read_record(ctx, &key).await? {
            Some(existing) => existing,
            None => self.reserve_record(ctx, tenant, &key).await?,
        };
        if !record.provisioned {
            record = self.complete_record(ctx, tenant, &key, record).await?;
        }

        let instance = DragonflyInstance::from_record(tenant.as_str(), record, &self.host, self.port)?;
        Ok(Box::new(instance))
    }
}

fn encode(record: &InstanceRecord) -> broker_core::Result<String> {
    serde_json::to_string(record)
        .map_err(|e| BrokerError::backend("encode instance data", InfraError::from(e)))
}

fn instance_key(tenant: &TenantName) -> String {
    format!("{}{}", INSTANCE_KEY_PREFIX, tenant)
}

fn namespace_name(tenant: &TenantName) -> String {
    format!("ns_{}", tenant)
}

fn user_name(tenant: &TenantName) -> String {
    format!("user_{}", tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Single-process stand-in for the engine
    #[derive(Default)]
    struct InMemoryBackend {
        keys: Mutex<HashMap<String, String>>,
        users: Mutex<HashMap<String, AclUser>>,
        setuser_calls: AtomicUsize,
        acl_delay: Option<Duration>,
        fail_acl: AtomicBool,
    }

    impl InMemoryBackend {
        fn users(&self) -> Vec<AclUser> {
            self.users.lock().values().cloned().collect()
        }

        fn record(&self, key: &str) -> Option<InstanceRecord> {
            self.keys
                .lock()
                .get(key)
                .map(|raw| serde_json::from_str(raw).unwrap())
        }
    }

    #[async_trait]
    impl KeyValueBackend for InMemoryBackend {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.keys.lock().get(key).cloned())
        }

        async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
            tokio::task::yield_now().await;
            let mut keys = self.keys.lock();
            if keys.contains_key(key) {
                return Ok(false);
            }
            keys.insert(key.to_string(), value.to_string());
            Ok(true)
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.keys.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            Ok(self
                .keys
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn create_acl_user(&self, user: &AclUser) -> Result<()> {
            self.setuser_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.acl_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_acl.load(Ordering::SeqCst) {
                return Err(InfraError::Internal("ACL SETUSER refused".to_string()));
            }
            self.users.lock().insert(user.username.clone(), user.clone());
            Ok(())
        }
    }

    fn setup_with(backend: InMemoryBackend) -> (Arc<InMemoryBackend>, DragonflyAdapter) {
        let backend = Arc::new(backend);
        let adapter = DragonflyAdapter::with_backend(backend.clone(), "kv.internal", 6379);
        (backend, adapter)
    }

    fn setup() -> (Arc<InMemoryBackend>, DragonflyAdapter) {
        setup_with(InMemoryBackend::default())
    }

    fn tenant(name: &str) -> TenantName {
        TenantName::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_is_idempotent() {
        let (backend, adapter) = setup();
        let ctx = OperationContext::background();

        let first = adapter.get_or_create_instance(&ctx, &tenant("acme")).await.unwrap();
        let second = adapter.get_or_create_instance(&ctx, &tenant("acme")).await.unwrap();

        let (first, second) = (first.describe(), second.describe());
        assert_eq!(first.password, second.password);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.username, "user_acme");
        assert_eq!(first.resource.name(), "ns_acme");
        assert_eq!(first.host, "kv.internal");
        assert_eq!(first.port, 6379);
        assert_eq!(backend.users().len(), 1);
        assert_eq!(backend.setuser_calls.load(Ordering::SeqCst), 1);
        assert!(backend.record("instance:acme").unwrap().provisioned);
    }

    #[tokio::test]
    async fn test_acl_user_scoped_to_namespace() {
        let (backend, adapter) = setup();
        let instance = adapter
            .get_or_create_instance(&OperationContext::background(), &tenant("acme"))
            .await
            .unwrap();

        let users = backend.users();
        assert_eq!(users[0].namespace, "ns_acme");
        assert_eq!(users[0].username, "user_acme");
        assert_eq!(users[0].password, instance.describe().password);
    }

    #[tokio::test]
    async fn test_concurrent_creation_has_single_winner() {
        let (backend, adapter) = setup();
        let ctx = OperationContext::background();
        let acme = tenant("acme");

        let results = futures::future::join_all(
            (0..16).map(|_| adapter.get_or_create_instance(&ctx, &acme)),
        )
        .await;

        let passwords: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().describe().password)
            .collect();
        assert!(passwords.iter().all(|p| p == &passwords[0]));

        let users = backend.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].password, passwords[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reader_never_gets_unprovisioned_credentials() {
        let (backend, adapter) = setup_with(InMemoryBackend {
            acl_delay: Some(Duration::from_millis(100)),
            fail_acl: AtomicBool::new(true),
            ..Default::default()
        });
        let ctx = OperationContext::background();
        let acme = tenant("acme");

        let (winner, reader) = tokio::join!(adapter.get_or_create_instance(&ctx, &acme), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            adapter.get_or_create_instance(&ctx, &acme).await
        });
        assert!(winner.is_err());
        assert!(reader.is_err());

        let reserved = backend.record("instance:acme").unwrap();
        assert!(!reserved.provisioned);
        assert!(backend.users().is_empty());

        backend.fail_acl.store(false, Ordering::SeqCst);
        let instance = adapter.get_or_create_instance(&ctx, &acme).await.unwrap();
        assert_eq!(instance.describe().password, reserved.password);
        assert_eq!(backend.users()[0].password, reserved.password);
        assert!(backend.record("instance:acme").unwrap().provisioned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reader_waits_for_user_creation() {
        let (backend, adapter) = setup_with(InMemoryBackend {
            acl_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let ctx = OperationContext::background();
        let acme = tenant("acme");

        let (winner, reader) = tokio::join!(adapter.get_or_create_instance(&ctx, &acme), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            adapter.get_or_create_instance(&ctx, &acme).await
        });
        let (winner, reader) = (winner.unwrap().describe(), reader.unwrap().describe());

        assert_eq!(winner.password, reader.password);
        let users = backend.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].password, winner.password);
    }

    #[tokio::test]
    async fn test_failed_acl_step_keeps_reserved_credentials() {
        let (backend, adapter) = setup();
        let ctx = OperationContext::background();
        backend.fail_acl.store(true, Ordering::SeqCst);

        let err = adapter
            .get_or_create_instance(&ctx, &tenant("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Backend { ref operation, .. } if operation == "create user"));
        let reserved = backend.record("instance:acme").unwrap();
        assert!(!reserved.provisioned);

        backend.fail_acl.store(false, Ordering::SeqCst);
        let instance = adapter.get_or_create_instance(&ctx, &tenant("acme")).await.unwrap();
        assert_eq!(instance.describe().password, reserved.password);
        assert_eq!(instance.describe().created_at, reserved.created_at);
        assert_eq!(backend.users().len(), 1);
    }

    #[tokio::test]
    async fn test_record_without_flag_is_complete() {
        let (backend, adapter) = setup();
        backend
            .set(
                "instance:legacy",
                r#"{"namespace":"ns_legacy","username":"user_legacy","password":"pw","created_at":"2024-01-01T00:00:00Z"}"#,
            )
            .await
            .unwrap();

        let instance = adapter
            .get_or_create_instance(&OperationContext::background(), &tenant("legacy"))
            .await
            .unwrap();
        assert_eq!(instance.describe().password, "pw");
        assert_eq!(backend.setuser_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_list_instance_names_sorted() {
        let (backend, adapter) = setup();
        let ctx = OperationContext::background();
        for name in ["zeta", "acme", "mid"] {
            adapter.get_or_create_instance(&ctx, &tenant(name)).await.unwrap();
        }
        backend.set_if_absent("unrelated", "x").await.unwrap();

        let names = adapter.list_instance_names(&ctx).await.unwrap();
        assert_eq!(names, vec!["acme", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_list_empty() {
        let (_, adapter) = setup();
        let names = adapter
            .list_instance_names(&OperationContext::background())
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_backend_error() {
        let (backend, adapter) = setup();
        backend.set_if_absent("instance:acme", "not json").await.unwrap();

        let err = adapter
            .get_or_create_instance(&OperationContext::background(), &tenant("acme"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_cancelled_context_creates_nothing() {
        let (backend, adapter) = setup();
        let ctx = OperationContext::background();
        ctx.cancel();

        let err = adapter
            .get_or_create_instance(&ctx, &tenant("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled(_)));
        assert!(backend.record("instance:acme").is_none());
        assert!(backend.users().is_empty());
    }
}
