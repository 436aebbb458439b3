use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::Utc;
use reststore_types::{CollectionResource, DocumentResource, OffsetLimit, Resource};
use tracing::{debug, info, warn};

use crate::config::{FileSystemConfig, META_DIR, TMP_DIR};
use crate::delete::{delete_path, prune_empty_ancestors};
use crate::error::{StoreError, StoreResult};
use crate::expand::expand;
use crate::expiry::ExpiryIndex;
use crate::lister::DirLister;
use crate::putter::FilePutter;
use crate::traits::{DeleteOptions, PutOptions, Storage};

/// Expired resources removed per cleanup run when the caller gives no amount.
pub const DEFAULT_CLEANUP_AMOUNT: usize = 100_000;

/// Join a slash-separated storage path onto `base`.
///
/// Empty, `.` and `..` segments are dropped so the result never escapes `base`.
pub(crate) fn join_storage_path(base: &Path, path: &str) -> PathBuf {
    let mut joined = base.to_path_buf();
    joined.extend(storage_segments(path));
    joined
}

fn storage_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
}

/// Returns `true` for paths that resolve inside the engine's own `.tmp` or
/// `.meta` trees.
pub(crate) fn is_reserved(path: &str) -> bool {
    matches!(storage_segments(path).next(), Some(TMP_DIR) | Some(META_DIR))
}

/// Entity tag derived from size and modification time.
pub(crate) fn etag_for(metadata: &std::fs::Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(&metadata.len().to_le_bytes());
    hasher.update(&mtime.to_le_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

/// Storage engine backed by a directory tree.
///
/// Documents are files, collections are directories. Writes are staged under
/// `<root>/.tmp/uploads` and renamed into place; expiry deadlines live under
/// `<root>/.meta/expire`. Both trees are hidden from listings.
pub struct FileSystemStorage {
    root: PathBuf,
    config: FileSystemConfig,
    index: ExpiryIndex,
    lister: DirLister,
}

impl FileSystemStorage {
    /// Open (and create if needed) the storage root.
    pub fn new(config: FileSystemConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.root)?;
        let root = std::fs::canonicalize(&config.root)?;
        if !root.is_dir() {
            return Err(StoreError::NotADirectory(root));
        }
        let index = ExpiryIndex::new(&root);
        let lister = DirLister::new(root.clone(), index.clone());
        info!(root = %root.display(), "filesystem storage opened");
        Ok(Self {
            root,
            config,
            index,
            lister,
        })
    }

    /// Canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        join_storage_path(&self.root, path)
    }

    pub(crate) fn expiry_index(&self) -> &ExpiryIndex {
        &self.index
    }

    pub(crate) fn lister(&self) -> &DirLister {
        &self.lister
    }

    /// First ancestor of `target` below the root that exists as a file.
    async fn file_ancestor(&self, target: &Path) -> Option<PathBuf> {
        let parent = target.parent()?;
        let mut chain: Vec<&Path> = parent
            .ancestors()
            .take_while(|p| p.starts_with(&self.root) && *p != self.root)
            .collect();
        chain.reverse();
        for ancestor in chain {
            match tokio::fs::metadata(ancestor).await {
                Ok(meta) if meta.is_file() => return Some(ancestor.to_path_buf()),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    async fn run_cleanup(&self, amount: usize) -> StoreResult<(usize, usize)> {
        let index = self.index.clone();
        let expired = tokio::task::spawn_blocking(move || index.collect_expired(amount, Utc::now()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let found = expired.len();
        let mut cleaned = 0;
        for entry in expired {
            let target = self.resolve(&entry.path);
            match tokio::fs::symlink_metadata(&target).await {
                Ok(meta) if meta.is_file() => {
                    tokio::fs::remove_file(&target).await?;
                    prune_empty_ancestors(&self.root, &target).await;
                    cleaned += 1;
                    debug!(path = %entry.path, "expired document removed");
                }
                Ok(_) | Err(_) => {
                    debug!(path = %entry.path, "dropping expiry record without document");
                }
            }
            match tokio::fs::remove_file(&entry.record).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok((cleaned, found))
    }
}

impl std::fmt::Debug for FileSystemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemStorage")
            .field("root", &self.root)
            .finish()
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    async fn get(&self, path: &str, etag: Option<&str>, window: OffsetLimit) -> Resource {
        if is_reserved(path) {
            return Resource::missing();
        }
        let target = self.resolve(path);
        let meta = match tokio::fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path, error = %e, "treating unreadable path as missing");
                }
                return Resource::missing();
            }
        };

        if meta.is_dir() {
            return self.lister.list(target, window).await;
        }

        if self.index.is_expired(path).await {
            debug!(path, "document expired");
            return Resource::missing();
        }

        let tag = etag_for(&meta);
        if etag == Some(tag.as_str()) {
            return Resource::not_modified();
        }

        match tokio::fs::File::open(&target).await {
            Ok(file) => Resource::document(DocumentResource::readable(
                meta.len(),
                Some(tag),
                Box::new(file),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Resource::missing(),
            Err(e) => {
                warn!(path, error = %e, "failed to open document");
                Resource::failed(e.to_string())
            }
        }
    }

    async fn put(&self, path: &str, options: PutOptions) -> Resource {
        if is_reserved(path) {
            return Resource::rejected(Some(format!("path {path} is reserved")));
        }
        if options.merge {
            warn!(path, "merge is not supported by the filesystem engine, replacing document");
        }
        if options.store_compressed {
            warn!(path, "compressed storage is not supported by the filesystem engine, storing plain");
        }
        if options.lock.is_requested() {
            debug!(path, owner = %options.lock.owner, mode = %options.lock.mode, "lock parameters are not enforced");
        }

        let target = self.resolve(path);
        if target == self.root {
            return Resource::collection(CollectionResource::default());
        }

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                debug!(path, "refusing to overwrite collection with document");
                return Resource::collection(CollectionResource::default());
            }
            Ok(meta) => {
                if options.etag.as_deref() == Some(etag_for(&meta).as_str()) {
                    return Resource::not_modified();
                }
            }
            Err(_) => {}
        }

        if let Some(ancestor) = self.file_ancestor(&target).await {
            debug!(path, ancestor = %ancestor.display(), "refusing to nest document below document");
            return Resource {
                exists: false,
                ..Resource::document(DocumentResource::default())
            };
        }

        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path, error = %e, "failed to create parent collection");
                return Resource::failed(e.to_string());
            }
        }

        FilePutter::new(
            target,
            path.to_string(),
            self.root.join(TMP_DIR).join("uploads"),
            &self.config,
            options.expire,
            self.index.clone(),
        )
        .execute()
        .await
    }

    async fn delete(&self, path: &str, options: DeleteOptions) -> Resource {
        if is_reserved(path) {
            return Resource::rejected(Some(format!("path {path} is reserved")));
        }
        if options.lock.is_requested() {
            debug!(path, owner = %options.lock.owner, mode = %options.lock.mode, "lock parameters are not enforced");
        }
        let target = self.resolve(path);
        if target == self.root {
            return Resource::failed("the storage root cannot be deleted");
        }

        let meta = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) => meta,
            Err(_) => return Resource::missing(),
        };
        let recursive = !(options.confirm_collection_delete && !options.recursive);

        if let Err(e) = delete_path(&target, meta.is_dir(), recursive).await {
            return match e {
                StoreError::Io(ref err) if err.kind() == io::ErrorKind::NotFound => {
                    Resource::missing()
                }
                other => {
                    debug!(path, error = %other, "delete failed");
                    Resource::failed(other.to_string())
                }
            };
        }

        if let Err(e) = self.index.forget_tree(path).await {
            warn!(path, error = %e, "failed to drop expiry records");
        }
        prune_empty_ancestors(&self.root, &target).await;
        info!(path, recursive, "deleted");

        if meta.is_dir() {
            Resource::collection(CollectionResource::default())
        } else {
            Resource::document(DocumentResource::default())
        }
    }

    async fn storage_expand(
        &self,
        path: &str,
        etag: Option<&str>,
        sub_resource_names: &[String],
    ) -> Resource {
        if is_reserved(path) {
            return Resource::missing();
        }
        expand(self, path, etag, sub_resource_names).await
    }

    async fn cleanup(&self, cleanup_amount_hint: Option<&str>) -> Resource {
        let amount = match cleanup_amount_hint.map(str::parse::<usize>) {
            None => DEFAULT_CLEANUP_AMOUNT,
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                warn!(hint = ?cleanup_amount_hint, "invalid cleanup amount, using default");
                DEFAULT_CLEANUP_AMOUNT
            }
        };
        match self.run_cleanup(amount).await {
            Ok((cleaned, found)) => {
                info!(cleaned, found, "cleanup finished");
                let body = serde_json::json!({
                    "cleanedResources": cleaned,
                    "expiredResources": found,
                })
                .to_string()
                .into_bytes();
                Resource::document(DocumentResource::readable(
                    body.len() as u64,
                    None,
                    Box::new(io::Cursor::new(body)),
                ))
            }
            Err(e) => {
                warn!(error = %e, "cleanup failed");
                Resource::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reststore_types::{DocumentContent, Expiry};
    use tokio::io::AsyncReadExt;

    fn storage(dir: &Path) -> FileSystemStorage {
        FileSystemStorage::new(FileSystemConfig::new(dir)).unwrap()
    }

    async fn write(storage: &FileSystemStorage, path: &str, body: &[u8], expire: Expiry) -> Resource {
        let mut resource = storage
            .put(
                path,
                PutOptions {
                    expire,
                    ..Default::default()
                },
            )
            .await;
        let mut sink = resource
            .as_document_mut()
            .and_then(|d| d.take_sink())
            .expect("writable document");
        sink.write_chunk(body).await.unwrap();
        sink.close().await.unwrap();
        resource
    }

    async fn read(storage: &FileSystemStorage, path: &str) -> Option<String> {
        let mut resource = storage.get(path, None, OffsetLimit::UNBOUNDED).await;
        if !resource.exists {
            return None;
        }
        let mut reader = resource.as_document_mut()?.take_reader()?;
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        Some(out)
    }

    fn names(resource: &Resource) -> Vec<String> {
        resource.as_collection().unwrap().listing_names()
    }

    // --- get ---

    #[tokio::test]
    async fn get_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        let r = s.get("/nope", None, OffsetLimit::UNBOUNDED).await;
        assert!(!r.exists);
        assert!(!r.error);
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/a/b/doc", b"{\"x\":1}", Expiry::Never).await;
        assert_eq!(read(&s, "/a/b/doc").await.as_deref(), Some("{\"x\":1}"));
    }

    #[tokio::test]
    async fn conditional_get_matches_etag() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"abc", Expiry::Never).await;

        let mut first = s.get("/doc", None, OffsetLimit::UNBOUNDED).await;
        let doc = first.as_document_mut().unwrap();
        assert_eq!(doc.length, 3);
        let tag = doc.etag.clone().unwrap();

        let second = s.get("/doc", Some(&tag), OffsetLimit::UNBOUNDED).await;
        assert!(second.exists);
        assert!(!second.modified);
        let third = s.get("/doc", Some("other"), OffsetLimit::UNBOUNDED).await;
        assert!(third.modified);
    }

    #[tokio::test]
    async fn listing_order_collections_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/coll/b.txt", b"b", Expiry::Never).await;
        write(&s, "/coll/c/x", b"x", Expiry::Never).await;
        write(&s, "/coll/a/y", b"y", Expiry::Never).await;

        let r = s.get("/coll", None, OffsetLimit::UNBOUNDED).await;
        assert_eq!(names(&r), vec!["a/", "c/", "b.txt"]);
    }

    #[tokio::test]
    async fn root_listing_hides_engine_directories() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"x", Expiry::After(3600)).await;
        assert!(dir.path().join(".tmp").is_dir());
        assert!(dir.path().join(".meta").is_dir());

        let r = s.get("/", None, OffsetLimit::UNBOUNDED).await;
        assert_eq!(names(&r), vec!["doc"]);
        assert!(!s.get("/.tmp", None, OffsetLimit::UNBOUNDED).await.exists);
    }

    #[tokio::test]
    async fn pagination_window() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        for name in ["a", "b", "c", "d"] {
            write(&s, &format!("/p/{name}"), b"-", Expiry::Never).await;
        }
        let page = s.get("/p", None, OffsetLimit::new(1, 2)).await;
        assert_eq!(names(&page), vec!["b", "c"]);
        let past_end = s.get("/p", None, OffsetLimit::new(2, 5)).await;
        assert_eq!(names(&past_end), vec!["a", "b", "c", "d"]);
        let negative = s.get("/p", None, OffsetLimit::new(-1, 1)).await;
        assert_eq!(names(&negative).len(), 4);
    }

    // --- put ---

    #[tokio::test]
    async fn put_onto_collection_is_refused_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/coll/child", b"x", Expiry::Never).await;

        let r = s.put("/coll", PutOptions::default()).await;
        assert!(r.is_collection());
        assert!(dir.path().join("coll").is_dir());
        assert_eq!(read(&s, "/coll/child").await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn put_below_document_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"x", Expiry::Never).await;

        let r = s.put("/doc/child", PutOptions::default()).await;
        assert!(r.is_document());
        assert!(!r.exists);
        assert!(dir.path().join("doc").is_file());
    }

    #[tokio::test]
    async fn put_with_matching_etag_is_not_modified() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"x", Expiry::Never).await;
        let mut current = s.get("/doc", None, OffsetLimit::UNBOUNDED).await;
        let tag = current.as_document_mut().unwrap().etag.clone();

        let r = s
            .put(
                "/doc",
                PutOptions {
                    etag: tag,
                    ..Default::default()
                },
            )
            .await;
        assert!(!r.modified);
    }

    #[tokio::test]
    async fn put_into_reserved_tree_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        let r = s.put("/.meta/x", PutOptions::default()).await;
        assert!(r.rejected);
    }

    #[tokio::test]
    async fn dot_segments_do_not_reach_reserved_trees() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"x", Expiry::After(3600)).await;
        assert!(dir.path().join(".meta").is_dir());

        for path in ["/./.meta", "/./.meta/expire", "/../.meta", "/a/../.tmp"] {
            let r = s.get(path, None, OffsetLimit::UNBOUNDED).await;
            assert!(!r.exists, "{path}");
        }
        assert!(s.put("/./.tmp/x", PutOptions::default()).await.rejected);
        assert!(s.delete("/./.meta", DeleteOptions::default()).await.rejected);
        assert!(!dir.path().join(".tmp/x").exists());
        assert!(dir.path().join(".meta").is_dir());
    }

    #[tokio::test]
    async fn readers_never_see_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"old", Expiry::Never).await;

        let mut pending = s.put("/doc", PutOptions::default()).await;
        let mut sink = pending.as_document_mut().unwrap().take_sink().unwrap();
        sink.write_chunk(b"new-").await.unwrap();
        assert_eq!(read(&s, "/doc").await.as_deref(), Some("old"));
        sink.write_chunk(b"content").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(read(&s, "/doc").await.as_deref(), Some("new-content"));
    }

    #[tokio::test]
    async fn expire_after_zero_hides_document() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/short", b"x", Expiry::After(0)).await;
        write(&s, "/forever", b"y", Expiry::Never).await;
        write(&s, "/huge", b"z", Expiry::After(u64::MAX)).await;

        assert_eq!(read(&s, "/short").await, None);
        assert_eq!(read(&s, "/forever").await.as_deref(), Some("y"));
        assert_eq!(read(&s, "/huge").await.as_deref(), Some("z"));
        let listing = s.get("/", None, OffsetLimit::UNBOUNDED).await;
        assert_eq!(names(&listing), vec!["forever", "huge"]);
    }

    #[tokio::test]
    async fn rewrite_without_expiry_clears_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/doc", b"x", Expiry::After(0)).await;
        write(&s, "/doc", b"y", Expiry::Never).await;
        assert_eq!(read(&s, "/doc").await.as_deref(), Some("y"));
    }

    // --- delete ---

    #[tokio::test]
    async fn delete_cascades_up_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/a/b/c", b"x", Expiry::Never).await;

        let r = s.delete("/a/b/c", DeleteOptions::default()).await;
        assert!(r.exists);
        assert!(!r.error);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().is_dir());
    }

    #[tokio::test]
    async fn delete_stops_at_non_empty_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/a/b/c", b"x", Expiry::Never).await;
        write(&s, "/a/keep", b"k", Expiry::Never).await;

        s.delete("/a/b/c", DeleteOptions::default()).await;
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a/keep").is_file());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        let r = s.delete("/ghost", DeleteOptions::default()).await;
        assert!(!r.exists);
        assert!(!r.error);
    }

    #[tokio::test]
    async fn confirmed_delete_of_non_empty_collection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/coll/doc", b"x", Expiry::Never).await;

        let r = s
            .delete(
                "/coll",
                DeleteOptions {
                    confirm_collection_delete: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(r.error);
        assert_eq!(
            r.error_message.as_deref(),
            Some("directory not empty. Use recursive=true parameter to delete")
        );
        assert!(dir.path().join("coll/doc").is_file());

        let r = s
            .delete(
                "/coll",
                DeleteOptions {
                    confirm_collection_delete: true,
                    recursive: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(!r.error);
        assert!(!dir.path().join("coll").exists());
    }

    #[tokio::test]
    async fn unconfirmed_delete_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/coll/sub/doc", b"x", Expiry::Never).await;

        let r = s.delete("/coll", DeleteOptions::default()).await;
        assert!(r.is_collection());
        assert!(!dir.path().join("coll").exists());
    }

    #[tokio::test]
    async fn storage_root_is_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        let r = s.delete("/", DeleteOptions::default()).await;
        assert!(r.error);
        assert!(dir.path().is_dir());
    }

    // --- cleanup ---

    #[tokio::test]
    async fn cleanup_removes_expired_documents() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        write(&s, "/x/gone", b"x", Expiry::After(0)).await;
        write(&s, "/stay", b"y", Expiry::After(3600)).await;

        let mut report = s.cleanup(None).await;
        assert!(report.exists);
        let mut body = String::new();
        let doc = report.as_document_mut().unwrap();
        assert!(matches!(doc.content, DocumentContent::Read(_)));
        doc.take_reader()
            .unwrap()
            .read_to_string(&mut body)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["cleanedResources"], 1);
        assert!(!dir.path().join("x").exists());
        assert!(dir.path().join("stay").is_file());

        // A second run finds nothing left to do.
        let mut again = s.cleanup(Some("10")).await;
        let mut body = String::new();
        again
            .as_document_mut()
            .unwrap()
            .take_reader()
            .unwrap()
            .read_to_string(&mut body)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["cleanedResources"], 0);
    }

    #[test]
    fn join_ignores_traversal() {
        let base = Path::new("/srv");
        assert_eq!(join_storage_path(base, "/a/../b//c/"), PathBuf::from("/srv/a/b/c"));
        assert_eq!(join_storage_path(base, "/"), PathBuf::from("/srv"));
    }
}
