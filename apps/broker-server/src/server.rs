//! HTTP Server implementation

use anyhow::{Context, Result};
use broker_api::{create_router, AppState};
use broker_core::{Registry, ServerConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.address();
        let state = AppState::new(self.registry, self.config.request_timeout());
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
