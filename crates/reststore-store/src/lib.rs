//! Storage engines for rest-storage.
//!
//! This crate defines the [`Storage`] contract that the protocol layer talks
//! to and implements it on top of a plain directory tree.
//!
//! # Storage Backends
//!
//! - [`FileSystemStorage`] -- documents are files, collections are directories
//!
//! # Design Rules
//!
//! 1. A path is absent, a document or a collection, never both.
//! 2. Writes are staged outside the visible tree and published by rename.
//! 3. A failed publish is retried against a deadline, recreating the parent.
//! 4. Deletes prune emptied ancestors but never the storage root.
//! 5. Directory enumeration runs on the blocking pool.
//! 6. Not-found is `exists = false`, never an error.

pub mod config;
mod delete;
pub mod error;
mod expand;
pub mod expiry;
pub mod filesystem;
pub mod lister;
pub mod putter;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use config::FileSystemConfig;
pub use error::{StoreError, StoreResult};
pub use expiry::ExpiryIndex;
pub use filesystem::{FileSystemStorage, DEFAULT_CLEANUP_AMOUNT};
pub use lister::DirLister;
pub use putter::{FilePutter, PutterState};
pub use traits::{DeleteOptions, PutOptions, Storage};
