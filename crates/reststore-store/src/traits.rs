use async_trait::async_trait;
use reststore_types::{Expiry, LockRequest, OffsetLimit, Resource};

/// Parameters of a `put`.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// Entity tag from `If-None-Match`; a match skips the write.
    pub etag: Option<String>,
    /// Merge the body into the stored JSON document instead of replacing it.
    pub merge: bool,
    pub expire: Expiry,
    pub lock: LockRequest,
    pub store_compressed: bool,
}

/// Parameters of a `delete`.
#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    pub lock: LockRequest,
    /// Refuse to delete a non-empty collection unless `recursive` is set.
    pub confirm_collection_delete: bool,
    pub recursive: bool,
}

/// Storage engine contract.
///
/// All implementations must satisfy these invariants:
/// - A path is absent, a document or a collection, never both.
/// - A document never replaces a collection and vice versa.
/// - Not-found is reported as `exists = false`, never as an error.
/// - The storage root is never deleted.
/// - Blocking I/O never runs on the caller's task.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a document or a (windowed) collection listing.
    ///
    /// Returns a not-modified resource when `etag` matches the stored tag.
    async fn get(&self, path: &str, etag: Option<&str>, window: OffsetLimit) -> Resource;

    /// Prepare a write.
    ///
    /// On success the resource is a document whose sink receives the body;
    /// closing the sink publishes it.
    async fn put(&self, path: &str, options: PutOptions) -> Resource;

    /// Delete a document or collection and prune emptied ancestors.
    async fn delete(&self, path: &str, options: DeleteOptions) -> Resource;

    /// Read the named children of the collection at `path` as one JSON document.
    async fn storage_expand(
        &self,
        path: &str,
        etag: Option<&str>,
        sub_resource_names: &[String],
    ) -> Resource;

    /// Run engine maintenance and return a document describing what was done.
    async fn cleanup(&self, cleanup_amount_hint: Option<&str>) -> Resource;

    /// Current memory pressure in percent, when measurable.
    fn current_memory_usage_percent(&self) -> Option<f32> {
        None
    }
}
