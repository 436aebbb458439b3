//! HTTP protocol layer for rest-storage.
//!
//! Serves a [`Storage`](reststore_store::Storage) engine over HTTP: GET reads
//! documents and collection listings, PUT streams documents in, DELETE removes
//! them, and `POST ?storageExpand` batch-reads children of a collection.

pub mod config;
pub mod error;
pub mod handler;
pub mod headers;
pub mod listing;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RestStorageHandler;
pub use server::RestStorageServer;
