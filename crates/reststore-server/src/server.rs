use std::sync::Arc;

use reststore_store::{FileSystemStorage, Storage};
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RestStorageHandler;
use crate::router::build_router;

/// rest-storage HTTP server.
pub struct RestStorageServer {
    config: ServerConfig,
    storage: Arc<dyn Storage>,
}

impl RestStorageServer {
    /// Server over a filesystem engine rooted at `config.root`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let storage = FileSystemStorage::new(config.filesystem_config())?;
        Ok(Self::with_storage(config, Arc::new(storage)))
    }

    /// Server over any storage engine.
    pub fn with_storage(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        Self { config, storage }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(RestStorageHandler::new(
            Arc::clone(&self.storage),
            self.config.clone(),
        ))
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            prefix = %self.config.prefix,
            root = %self.config.root.display(),
            "rest-storage listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
