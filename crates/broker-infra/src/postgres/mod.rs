//! Relational backend adapter
//!
//! Each tenant gets a database `db_<tenant>` owned by a login role
//! `user_<tenant>_<suffix>`. Public connect access to the database is revoked, so the role
//! is the only non-superuser able to reach it. Tenants are tracked in the `instances`
//! table of the administrative database.

mod instance;
pub mod migrations;

pub use instance::PostgresInstance;

use async_trait::async_trait;
use broker_core::endpoint::{uri_host_port, POSTGRES_DEFAULT_PORT};
use broker_core::{
    random_password, random_token, Adapter, BrokerError, Instance, OperationContext,
    PostgresConfig, TenantName,
};
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::{InfraError, Result};
use instance::InstanceRow;

/// SQLSTATE for `duplicate_database`
const PG_DUPLICATE_DATABASE: &str = "42P04";

/// SQLSTATE for `unique_violation`
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Longest identifier the engine stores without truncating
const PG_MAX_IDENTIFIER_LEN: usize = 63;

/// Random bytes in the role-name suffix (7 base32 characters)
const ROLE_SUFFIX_BYTES: usize = 4;

/// Longest tenant name whose derived role name still fits an identifier
pub const MAX_TENANT_NAME_LEN: usize = PG_MAX_IDENTIFIER_LEN - "user__".len() - 7;

pub struct PostgresAdapter {
    pool: PgPool,
    host: String,
    port: u16,
}

impl PostgresAdapter {
    /// Connect to the administrative database and migrate the metadata schema
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let uri = config
            .resolved_uri()
            .map_err(|e| InfraError::Configuration(e.to_string()))?;
        let (host, port) = uri_host_port(&uri, POSTGRES_DEFAULT_PORT)
            .map_err(|e| InfraError::Configuration(format!("parse postgres uri: {}", e)))?;

        info!(host = %host, port = port, "Connecting to PostgreSQL");

        let options = PgConnectOptions::from_str(&uri)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        Self::from_pool(pool, host, port).await
    }

    /// Wrap an existing pool; `host`/`port` are reported to tenants in their URIs
    pub async fn from_pool(pool: PgPool, host: impl Into<String>, port: u16) -> Result<Self> {
        migrations::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            host: host.into(),
            port,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn find_instance(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
    ) -> broker_core::Result<Option<PostgresInstance>> {
        let row = ctx
            .run(
                "get instance",
                sqlx::query_as::<_, InstanceRow>(
                    "SELECT instance_name, db_name, db_user, db_password, created_at \
                     FROM instances WHERE instance_name = $1",
                )
                .bind(tenant.as_str())
                .fetch_optional(&self.pool),
            )
            .await?;
        row.map(|row| PostgresInstance::from_row(row, &self.host, self.port))
            .transpose()
    }

    async fn create_database(&self, ctx: &OperationContext, name: &str) -> broker_core::Result<()> {
        let sql = format!("CREATE DATABASE {}", quote_identifier(name));
        match ctx
            .guard("create database", sqlx::query(&sql).execute(&self.pool))
            .await?
        {
            Ok(_) => Ok(()),
            // A concurrent creator won; the database exists either way.
            Err(e)
                if has_sqlstate(&e, PG_DUPLICATE_DATABASE)
                    || has_sqlstate(&e, PG_UNIQUE_VIOLATION) =>
            {
                debug!(database = %name, "Database already exists");
                Ok(())
            }
            Err(e) => Err(BrokerError::backend("create database", e)),
        }
    }

    /// Create the role, record the tenant and lock the database down to that role, atomically.
    ///
    /// Returns `Ok(false)` when another caller inserted the tenant's row first.
    async fn provision(&self, ctx: &OperationContext, row: &InstanceRow) -> broker_core::Result<bool> {
        let mut tx = ctx.run("begin transaction", self.pool.begin()).await?;

        exec(ctx, &mut tx, "create role", &create_role_sql(&row.db_user, &row.db_password)).await?;

        let inserted = ctx
            .guard(
                "insert instance",
                sqlx::query(
                    "INSERT INTO instances (instance_name, db_name, db_user, db_password, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&row.instance_name)
                .bind(&row.db_name)
                .bind(&row.db_user)
                .bind(&row.db_password)
                .bind(row.created_at)
                .execute(&mut *tx),
            )
            .await?;
        match inserted {
            Ok(_) => {}
            Err(e) if has_sqlstate(&e, PG_UNIQUE_VIOLATION) => {
                // Dropping `tx` rolls back the role created above.
                return Ok(false);
            }
            Err(e) => return Err(BrokerError::backend("insert instance", e)),
        }

        exec(
            ctx,
            &mut tx,
            "transfer db ownership",
            &transfer_ownership_sql(&row.db_name, &row.db_user),
        )
        .await?;
        exec(
            ctx,
            &mut tx,
            "revoke db public access",
            &revoke_public_connect_sql(&row.db_name),
        )
        .await?;
        exec(
            ctx,
            &mut tx,
            "grant db connect access",
            &grant_connect_sql(&row.db_name, &row.db_user),
        )
        .await?;

        ctx.run("commit transaction", tx.commit()).await?;
        Ok(true)
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    async fn list_instance_names(&self, ctx: &OperationContext) -> broker_core::Result<Vec<String>> {
        ctx.run(
            "list instances",
            sqlx::query_scalar::<_, String>(
                "SELECT instance_name FROM instances ORDER BY instance_name ASC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn get_or_create_instance(
        &self,
        ctx: &OperationContext,
        tenant: &TenantName,
    ) -> broker_core::Result<Box<dyn Instance>> {
        if let Some(existing) = self.find_instance(ctx, tenant).await? {
            return Ok(Box::new(existing));
        }

        check_identifier_len(tenant)?;

        let row = InstanceRow {
            instance_name: tenant.to_string(),
            db_name: database_name(tenant),
            db_user: role_name(tenant, &random_token(ROLE_SUFFIX_BYTES)),
            db_password: random_password(),
            created_at: Utc::now(),
        };

        // CREATE DATABASE cannot run inside a transaction block.
        self.create_database(ctx, &row.db_name).await?;

        if self.provision(ctx, &row).await? {
            info!(
                tenant = %tenant,
                database = %row.db_name,
                role = %row.db_user,
                "Provisioned PostgreSQL instance"
            );
            return Ok(Box::new(PostgresInstance::from_row(row, &self.host, self.port)?));
        }

        debug!(tenant = %tenant, "Lost instance insert race, reading winner");
        let winner = self.find_instance(ctx, tenant).await?.ok_or_else(|| {
            BrokerError::backend(
                "get instance",
                InfraError::Internal(format!("instance {} vanished after conflict", tenant)),
            )
        })?;
        Ok(Box::new(winner))
    }
}

async fn exec(
    ctx: &OperationContext,
    conn: &mut PgConnection,
    operation: &str,
    sql: &str,
) -> broker_core::Result<()> {
    ctx.run(operation, sqlx::query(sql).execute(conn)).await?;
    Ok(())
}

/// Reject tenants whose derived identifiers the engine would silently truncate
fn check_identifier_len(tenant: &TenantName) -> broker_core::Result<()> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(BrokerError::InvalidTenantName(format!(
            "{} (longer than {} characters)",
            tenant, MAX_TENANT_NAME_LEN
        )));
    }
    Ok(())
}

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c == code).unwrap_or(false),
        _ => false,
    }
}

pub(crate) fn database_name(tenant: &TenantName) -> String {
    format!("db_{}", tenant)
}

/// The random suffix keeps role names unique across retries of a failed provisioning
pub(crate) fn role_name(tenant: &TenantName, suffix: &str) -> String {
    format!("user_{}_{}", tenant, suffix.to_lowercase())
}

/// Quote an identifier for safe use in SQL
pub(crate) fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Quote a string literal for safe use in SQL
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn create_role_sql(role: &str, password: &str) -> String {
    format!(
        "CREATE ROLE {} LOGIN PASSWORD {} NOSUPERUSER NOCREATEDB NOCREATEROLE NOINHERIT",
        quote_identifier(role),
        quote_literal(password)
    )
}

fn transfer_ownership_sql(database: &str, role: &str) -> String {
    format!(
        "ALTER DATABASE {} OWNER TO {}",
        quote_identifier(database),
        quote_identifier(role)
    )
}

fn revoke_public_connect_sql(database: &str) -> String {
    format!("REVOKE CONNECT ON DATABASE {} FROM PUBLIC", quote_identifier(database))
}

fn grant_connect_sql(database: &str, role: &str) -> String {
    format!(
        "GRANT CONNECT ON DATABASE {} TO {}",
        quote_identifier(database),
        quote_identifier(role)
    )
}
