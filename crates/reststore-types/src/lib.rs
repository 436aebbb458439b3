//! Foundation types for rest-storage.
//!
//! This crate provides the resource model and request parameter types shared
//! by every storage engine and the protocol layer. Every other rest-storage
//! crate depends on `reststore-types`.
//!
//! # Key Types
//!
//! - [`Resource`] -- Outcome of a storage operation, tagged by [`ResourceKind`]
//! - [`DocumentResource`] -- Leaf content with a readable or writable body
//! - [`CollectionResource`] -- Ordered children of a directory-like resource
//! - [`ErrorChannel`] -- Multi-subscriber notification of late failures
//! - [`PathProcessingStrategy`] -- Request path normalization rule
//! - [`OffsetLimit`], [`LockRequest`], [`Expiry`] -- Per-request parameters

pub mod document;
pub mod error;
pub mod fault;
pub mod params;
pub mod path;
pub mod resource;

pub use document::{DocumentContent, DocumentReader, DocumentResource, DocumentSink};
pub use error::TypesError;
pub use fault::{ErrorChannel, ResourceFault};
pub use params::{Expiry, LockMode, LockRequest, OffsetLimit, DEFAULT_LOCK_EXPIRE_SECS};
pub use path::{clean_path, PathProcessingStrategy, PathProcessingStrategyFinder};
pub use resource::{
    collection_name, CollectionResource, Resource, ResourceKind, ROOT_COLLECTION_NAME,
};
