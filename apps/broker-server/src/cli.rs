//! Command-line argument parsing

use broker_core::{BrokerConfig, DragonflyConfig, PostgresConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "broker-server",
    about = "Database broker",
    version,
    long_about = "Provisions isolated per-tenant PostgreSQL databases and \
                  Dragonfly/Redis ACL users on demand."
)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP server port
    #[arg(short, long, env = "SERVICE_PORT")]
    pub port: Option<u16>,

    /// Administrative PostgreSQL connection URI
    #[arg(long, env = "POSTGRES_URI")]
    pub postgres_uri: Option<String>,

    /// File holding the PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD_FILE")]
    pub postgres_password_file: Option<PathBuf>,

    /// Administrative Dragonfly/Redis connection URI
    #[arg(long, env = "DRAGONFLY_URI")]
    pub dragonfly_uri: Option<String>,

    /// File holding the Dragonfly/Redis password
    #[arg(long, env = "DRAGONFLY_PASSWORD_FILE")]
    pub dragonfly_password_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Layer command-line values over the file/environment configuration
    pub fn apply_overrides(&self, config: &mut BrokerConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }

        if let Some(uri) = &self.postgres_uri {
            match config.postgres.as_mut() {
                Some(postgres) => postgres.uri = uri.clone(),
                None => config.postgres = Some(PostgresConfig::new(uri.clone())),
            }
        }
        if let (Some(path), Some(postgres)) =
            (&self.postgres_password_file, config.postgres.as_mut())
        {
            postgres.password_file = Some(path.clone());
        }

        if let Some(uri) = &self.dragonfly_uri {
            match config.dragonfly.as_mut() {
                Some(dragonfly) => dragonfly.uri = uri.clone(),
                None => config.dragonfly = Some(DragonflyConfig::new(uri.clone())),
            }
        }
        if let (Some(path), Some(dragonfly)) =
            (&self.dragonfly_password_file, config.dragonfly.as_mut())
        {
            dragonfly.password_file = Some(path.clone());
        }
    }
}
