use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use reststore_types::{CollectionResource, DocumentResource, OffsetLimit, Resource};
use tracing::{debug, warn};

use crate::config::{META_DIR, TMP_DIR};
use crate::expiry::ExpiryIndex;
use crate::filesystem::etag_for;

/// Enumerates collections on the blocking pool.
#[derive(Clone, Debug)]
pub struct DirLister {
    root: PathBuf,
    index: ExpiryIndex,
}

impl DirLister {
    pub fn new(root: PathBuf, index: ExpiryIndex) -> Self {
        Self { root, index }
    }

    /// List the collection at `dir`, sorted and windowed.
    ///
    /// A failed enumeration yields a resource with `exists = false` and the
    /// `error`, `rejected` and `invalid` flags set.
    pub async fn list(&self, dir: PathBuf, window: OffsetLimit) -> Resource {
        let lister = self.clone();
        let started = Instant::now();
        let dir_display = dir.display().to_string();
        let result = tokio::task::spawn_blocking(move || lister.list_blocking(&dir, window))
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));
        debug!(
            dir = %dir_display,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "directory listed"
        );
        match result {
            Ok(collection) => Resource::collection(collection),
            Err(e) => {
                warn!(dir = %dir_display, error = %e, "directory listing failed");
                let message = e.to_string();
                Resource {
                    exists: false,
                    error: true,
                    rejected: true,
                    invalid: true,
                    error_message: Some(message.clone()),
                    invalid_message: Some(message),
                    ..Resource::missing()
                }
            }
        }
    }

    /// Blocking enumeration of the children of `dir`.
    pub fn list_blocking(&self, dir: &Path, window: OffsetLimit) -> io::Result<CollectionResource> {
        let at_root = dir == self.root;
        let now = Utc::now();
        let mut items = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                warn!(dir = %dir.display(), "skipping entry with non UTF-8 name");
                continue;
            };
            if at_root && (name == TMP_DIR || name == META_DIR) {
                continue;
            }
            let child = entry.path();
            let resource = match std::fs::metadata(&child) {
                Ok(meta) if meta.is_dir() => Resource::collection(CollectionResource::default()),
                Ok(meta) => {
                    if self.index.is_expired_blocking(&self.storage_path(&child), now) {
                        continue;
                    }
                    Resource::document(DocumentResource {
                        length: meta.len(),
                        etag: Some(etag_for(&meta)),
                        ..Default::default()
                    })
                }
                Err(_) => Resource::missing(),
            };
            items.push(resource.with_name(name));
        }

        let mut collection = CollectionResource::new(items);
        collection.sort();
        let range = window.window(collection.items.len());
        if range.len() != collection.items.len() {
            collection.items = collection.items.drain(range).collect();
        }
        Ok(collection)
    }

    fn storage_path(&self, child: &Path) -> String {
        let relative = child.strip_prefix(&self.root).unwrap_or(child);
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reststore_types::Expiry;

    fn setup() -> (tempfile::TempDir, DirLister) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let lister = DirLister::new(root.clone(), ExpiryIndex::new(&root));
        (dir, lister)
    }

    fn names(collection: &CollectionResource) -> Vec<String> {
        collection.items.iter().map(Resource::listing_name).collect()
    }

    #[test]
    fn sorts_collections_first() {
        let (dir, lister) = setup();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let listing = lister.list_blocking(dir.path(), OffsetLimit::UNBOUNDED).unwrap();
        assert_eq!(names(&listing), vec!["a/", "c/", "b.txt"]);
    }

    #[test]
    fn documents_carry_length_and_etag() {
        let (dir, lister) = setup();
        std::fs::write(dir.path().join("doc"), b"hello").unwrap();

        let listing = lister.list_blocking(dir.path(), OffsetLimit::UNBOUNDED).unwrap();
        match &listing.items[0].kind {
            reststore_types::ResourceKind::Document(doc) => {
                assert_eq!(doc.length, 5);
                assert!(doc.etag.is_some());
            }
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[test]
    fn reserved_directories_hidden_only_at_root() {
        let (dir, lister) = setup();
        std::fs::create_dir_all(dir.path().join(".tmp/uploads")).unwrap();
        std::fs::create_dir_all(dir.path().join(".meta")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub/.tmp")).unwrap();

        let root = lister.list_blocking(dir.path(), OffsetLimit::UNBOUNDED).unwrap();
        assert_eq!(names(&root), vec!["sub/"]);
        let sub = lister
            .list_blocking(&dir.path().join("sub"), OffsetLimit::UNBOUNDED)
            .unwrap();
        assert_eq!(names(&sub), vec![".tmp/"]);
    }

    #[test]
    fn window_applied_after_sort() {
        let (dir, lister) = setup();
        for name in ["e", "d", "c", "b", "a"] {
            std::fs::write(dir.path().join(name), b"-").unwrap();
        }
        let page = lister.list_blocking(dir.path(), OffsetLimit::new(1, 2)).unwrap();
        assert_eq!(names(&page), vec!["b", "c"]);
        let rest = lister.list_blocking(dir.path(), OffsetLimit::new(3, -1)).unwrap();
        assert_eq!(names(&rest), vec!["d", "e"]);
    }

    #[tokio::test]
    async fn expired_documents_are_hidden() {
        let (dir, lister) = setup();
        std::fs::write(dir.path().join("old"), b"-").unwrap();
        std::fs::write(dir.path().join("new"), b"-").unwrap();
        ExpiryIndex::new(dir.path())
            .record("/old", Expiry::After(0))
            .await
            .unwrap();

        let listing = lister.list(dir.path().to_path_buf(), OffsetLimit::UNBOUNDED).await;
        assert_eq!(listing.as_collection().unwrap().listing_names(), vec!["new"]);
    }

    #[tokio::test]
    async fn unreadable_directory_sets_fault_flags() {
        let (dir, lister) = setup();
        let listing = lister
            .list(dir.path().join("missing"), OffsetLimit::UNBOUNDED)
            .await;
        assert!(!listing.exists);
        assert!(listing.error && listing.rejected && listing.invalid);
        assert!(listing.error_message.is_some());
        assert_eq!(listing.error_message, listing.invalid_message);
    }
}
