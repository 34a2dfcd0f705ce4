//! Application state and initialization

use anyhow::{bail, Context, Result};
use broker_core::{BrokerConfig, Registry};
use broker_infra::{DragonflyAdapter, PostgresAdapter};
use std::sync::Arc;
use tracing::info;

use crate::cli::Args;
use crate::server::Server;

/// Name the relational adapter is registered under
pub const POSTGRES_BACKEND: &str = "postgres";

/// Main application
pub struct App {
    config: BrokerConfig,
    registry: Arc<Registry>,
    postgres: Option<Arc<PostgresAdapter>>,
}

impl App {
    /// Load configuration and connect every configured backend
    pub async fn build(args: Args) -> Result<Self> {
        let mut config = BrokerConfig::load_from(args.config.as_deref())
            .context("Failed to load configuration")?;
        args.apply_overrides(&mut config);

        if config.postgres.is_none() && config.dragonfly.is_none() {
            bail!("No backend configured: set POSTGRES_URI and/or DRAGONFLY_URI");
        }

        let registry = Arc::new(Registry::new());

        let postgres = match &config.postgres {
            Some(pg_config) => {
                let adapter = Arc::new(
                    PostgresAdapter::connect(pg_config)
                        .await
                        .context("Failed to initialize PostgreSQL adapter")?,
                );
                registry.register_adapter(POSTGRES_BACKEND, adapter.clone());
                Some(adapter)
            }
            None => None,
        };

        if let Some(kv_config) = &config.dragonfly {
            let adapter = Arc::new(
                DragonflyAdapter::connect(kv_config)
                    .await
                    .context("Failed to initialize Dragonfly adapter")?,
            );
            for alias in &kv_config.aliases {
                registry.register_adapter(alias.clone(), adapter.clone());
            }
        }

        info!(backends = ?registry.adapter_names(), "Adapters registered");

        Ok(Self {
            config,
            registry,
            postgres,
        })
    }

    /// Serve until a shutdown signal arrives, then release backend connections
    pub async fn run(self) -> Result<()> {
        let server = Server::new(self.config.server.clone(), self.registry.clone());
        let result = server.run().await;

        if let Some(postgres) = &self.postgres {
            postgres.close().await;
            info!("PostgreSQL pool closed");
        }

        result
    }
}
