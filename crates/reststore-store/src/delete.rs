//! Deletion with upward pruning of emptied collections.

use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Remove `target`.
///
/// Directories are removed with their contents when `recursive` is set;
/// otherwise only an empty directory can be removed.
pub(crate) async fn delete_path(target: &Path, is_dir: bool, recursive: bool) -> StoreResult<()> {
    let result = match (is_dir, recursive) {
        (false, _) => tokio::fs::remove_file(target).await,
        (true, true) => tokio::fs::remove_dir_all(target).await,
        (true, false) => tokio::fs::remove_dir(target).await,
    };
    result.map_err(|e| match e.kind() {
        io::ErrorKind::DirectoryNotEmpty => StoreError::DirectoryNotEmpty,
        _ => StoreError::Io(e),
    })
}

/// Remove the now-empty ancestors of `deleted`, bottom up.
///
/// Stops at the first non-empty ancestor, at an ancestor that is already
/// gone, and always before `root`. Never fails.
pub(crate) async fn prune_empty_ancestors(root: &Path, deleted: &Path) {
    let mut current = deleted.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed empty collection");
                current = dir.parent();
            }
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "collection already removed by a concurrent request");
                break;
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "stopping cleanup of empty collections");
                break;
            }
        }
    }
}
