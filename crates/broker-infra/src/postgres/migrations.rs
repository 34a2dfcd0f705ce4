//! Metadata schema migrations
//!
//! SQL files under `migrations/` are embedded at compile time. sqlx serializes concurrent
//! runners with an advisory lock and records applied versions in `_sqlx_migrations`.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

use crate::{InfraError, Result};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration in version order
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running metadata migrations");

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| InfraError::Migration(e.to_string()))?;

    info!("Metadata migrations complete");
    Ok(())
}
