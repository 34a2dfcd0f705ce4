use broker_core::endpoint::build_connection_uri;
use broker_core::{Instance, InstanceDescription, ResourceIdentifier, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata stored at `instance:<tenant>`; host, port and tenant come from the adapter.
///
/// A record is written with `provisioned: false` before the ACL user exists and only handed
/// to callers once it is flipped to `true`. Records lacking the flag are complete.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct InstanceRecord {
    pub namespace: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "provisioned_default")]
    pub provisioned: bool,
}

fn provisioned_default() -> bool {
    true
}

/// A tenant's ACL user and key namespace on the key-value engine
#[derive(Clone)]
pub struct DragonflyInstance {
    pub instance: String,
    pub host: String,
    pub port: u16,
    pub namespace: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    uri: String,
}

impl DragonflyInstance {
    pub(crate) fn from_record(
        tenant: &str,
        record: InstanceRecord,
        host: &str,
        port: u16,
    ) -> Result<Self> {
        let uri = build_connection_uri("redis", host, port, &record.username, &record.password, "0")?;
        Ok(Self {
            instance: tenant.to_string(),
            host: host.to_string(),
            port,
            namespace: record.namespace,
            username: record.username,
            password: record.password,
            created_at: record.created_at,
            uri,
        })
    }
}

impl fmt::Debug for DragonflyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DragonflyInstance")
            .field("instance", &self.instance)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Instance for DragonflyInstance {
    fn tenant_name(&self) -> &str {
        &self.instance
    }

    fn connection_uri(&self) -> String {
        self.uri.clone()
    }

    fn describe(&self) -> InstanceDescription {
        InstanceDescription {
            instance: self.instance.clone(),
            host: self.host.clone(),
            port: self.port,
            resource: ResourceIdentifier::Namespace(self.namespace.clone()),
            username: self.username.clone(),
            password: self.password.clone(),
            uri: self.connection_uri(),
            created_at: self.created_at,
        }
    }
}
