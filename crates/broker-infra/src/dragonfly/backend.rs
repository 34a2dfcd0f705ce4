//! Key-value engine client seam

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::Result;

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 100;

/// An ACL user confined to one key namespace
#[derive(Clone, PartialEq, Eq)]
pub struct AclUser {
    pub username: String,
    pub password: String,
    pub namespace: String,
}

impl AclUser {
    /// Arguments of the `ACL SETUSER` directive: all command categories except
    /// administrative ones, scoped to `namespace`
    pub fn setuser_args(&self) -> Vec<String> {
        vec![
            "SETUSER".to_string(),
            self.username.clone(),
            "NAMESPACE".to_string(),
            self.namespace.clone(),
            "ON".to_string(),
            "RESETPASS".to_string(),
            format!(">{}", self.password),
            "+@all".to_string(),
            "-@admin".to_string(),
            "-ACL".to_string(),
            "-CONFIG".to_string(),
            "-MODULE".to_string(),
            "-CLUSTER".to_string(),
            format!("::{}", self.namespace),
        ]
    }
}

impl std::fmt::Debug for AclUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Operations the key-value adapter needs from its engine.
///
/// `create_acl_user` must be idempotent for identical arguments.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` only if `key` is absent; `true` if this call wrote it
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Write `value` unconditionally
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// All keys matching a glob `pattern`
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    async fn create_acl_user(&self, user: &AclUser) -> Result<()>;
}

/// [`KeyValueBackend`] over a shared, auto-reconnecting Redis-protocol connection
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::open(uri)?;
        let connection = ConnectionManager::new(client).await?;

        info!("Key-value connection established");

        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, count = keys.len(), "Scanned keys");
        Ok(keys)
    }

    async fn create_acl_user(&self, user: &AclUser) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("ACL")
            .arg(user.setuser_args())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
