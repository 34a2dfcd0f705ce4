use broker_core::endpoint::build_connection_uri;
use broker_core::{Instance, InstanceDescription, ResourceIdentifier, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// Row of the `instances` metadata table
#[derive(Clone, sqlx::FromRow)]
pub(crate) struct InstanceRow {
    pub instance_name: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub created_at: DateTime<Utc>,
}

/// A tenant's database and login role on the relational engine
#[derive(Clone)]
pub struct PostgresInstance {
    pub instance_name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    uri: String,
}

impl PostgresInstance {
    /// Host and port are not stored per row; they come from the adapter's endpoint
    pub(crate) fn from_row(row: InstanceRow, host: &str, port: u16) -> Result<Self> {
        let uri = build_connection_uri(
            "postgres",
            host,
            port,
            &row.db_user,
            &row.db_password,
            &format!("{}?sslmode=prefer", row.db_name),
        )?;
        Ok(Self {
            instance_name: row.instance_name,
            host: host.to_string(),
            port,
            database: row.db_name,
            username: row.db_user,
            password: row.db_password,
            created_at: row.created_at,
            uri,
        })
    }
}

impl fmt::Debug for PostgresInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresInstance")
            .field("instance_name", &self.instance_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Instance for PostgresInstance {
    fn tenant_name(&self) -> &str {
        &self.instance_name
    }

    fn connection_uri(&self) -> String {
        self.uri.clone()
    }

    fn describe(&self) -> InstanceDescription {
        InstanceDescription {
            instance: self.instance_name.clone(),
            host: self.host.clone(),
            port: self.port,
            resource: ResourceIdentifier::Database(self.database.clone()),
            username: self.username.clone(),
            password: self.password.clone(),
            uri: self.connection_uri(),
            created_at: self.created_at,
        }
    }
}
