use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{BrokerError, Result};

/// Main broker configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub dragonfly: Option<DragonflyConfig>,
}

impl BrokerConfig {
    /// Load configuration from `BROKER__*` environment variables
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional file with environment overrides
    pub fn load_from(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        Self::build(path, environment())
    }

    fn build(path: Option<&Path>, env: Environment) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder.add_source(env).build()?.try_deserialize()
    }
}

/// `BROKER__SECTION__KEY` variables; list-valued keys take comma-separated values
fn environment() -> Environment {
    Environment::with_prefix("BROKER")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("dragonfly.aliases")
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Relational backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// Administrative connection URI
    pub uri: String,
    /// File whose content replaces the password in `uri`
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl PostgresConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            password_file: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    pub fn with_password_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_file = Some(path.into());
        self
    }

    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Connection URI with the password file applied
    pub fn resolved_uri(&self) -> Result<String> {
        resolve_password_file(&self.uri, self.password_file.as_deref())
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

/// Key-value backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DragonflyConfig {
    pub uri: String,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    /// Backend names the adapter is registered under
    #[serde(default = "default_aliases")]
    pub aliases: Vec<String>,
}

impl DragonflyConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            password_file: None,
            aliases: default_aliases(),
        }
    }

    pub fn with_password_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_file = Some(path.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn resolved_uri(&self) -> Result<String> {
        resolve_password_file(&self.uri, self.password_file.as_deref())
    }
}

fn default_aliases() -> Vec<String> {
    vec!["dragonfly".to_string(), "redis".to_string()]
}

/// Replace the password in `uri` with the content of `password_file`, keeping the username.
///
/// Trailing line breaks in the file are ignored.
pub fn resolve_password_file(uri: &str, password_file: Option<&Path>) -> Result<String> {
    let Some(path) = password_file else {
        return Ok(uri.to_string());
    };

    let password = std::fs::read_to_string(path).map_err(|e| {
        BrokerError::Configuration(format!(
            "failed to read password file {}: {}",
            path.display(),
            e
        ))
    })?;
    let password = password.trim_end_matches(['\r', '\n']);

    let mut parsed = Url::parse(uri)
        .map_err(|e| BrokerError::Configuration(format!("invalid uri: {}", e)))?;
    parsed
        .set_password(Some(password))
        .map_err(|_| BrokerError::Configuration("uri cannot carry credentials".to_string()))?;
    Ok(parsed.to_string())
}
