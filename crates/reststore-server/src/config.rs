use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reststore_store::FileSystemConfig;
use reststore_types::PathProcessingStrategy;
use serde::{Deserialize, Serialize};

use crate::error::ServerResult;

/// Server configuration, loadable from TOML. Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory holding the stored tree.
    pub root: PathBuf,
    /// URL prefix under which the store is served, e.g. `/storage`.
    pub prefix: String,
    /// Refuse to delete non-empty collections unless `recursive=true` is given.
    pub confirm_collection_delete: bool,
    /// Compare `x-importance-level` against memory pressure before writes.
    pub reject_storage_write_on_low_memory: bool,
    /// Answer DELETE of a missing resource with 200 instead of 404.
    pub return_200_on_delete_non_existing: bool,
    pub path_processing_strategy: PathProcessingStrategy,
    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
    pub publish_retry_timeout_ms: u64,
    pub publish_retry_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8989)),
            root: PathBuf::from("."),
            prefix: String::new(),
            confirm_collection_delete: false,
            reject_storage_write_on_low_memory: false,
            return_200_on_delete_non_existing: false,
            path_processing_strategy: PathProcessingStrategy::Cleaned,
            max_body_size: 100 * 1024 * 1024,
            publish_retry_timeout_ms: 5000,
            publish_retry_delay_ms: 50,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: &Path) -> ServerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> ServerResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Prefix without a trailing slash; the empty prefix serves everything.
    pub fn normalized_prefix(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    /// Engine configuration derived from these settings.
    pub fn filesystem_config(&self) -> FileSystemConfig {
        FileSystemConfig {
            root: self.root.clone(),
            publish_retry_timeout: Duration::from_millis(self.publish_retry_timeout_ms),
            publish_retry_delay: Duration::from_millis(self.publish_retry_delay_ms),
        }
    }
}
