//! Expiry bookkeeping for the filesystem engine.
//!
//! Each document written with a finite expiry gets a record under
//! `<root>/.meta/expire/` mirroring its storage path. The record holds the
//! RFC 3339 deadline. Reads treat a document whose deadline has passed as
//! absent, and `cleanup` removes such documents for good.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reststore_types::Expiry;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::META_DIR;
use crate::error::StoreResult;
use crate::filesystem::join_storage_path;

const EXPIRE_DIR: &str = "expire";
const RECORD_SUFFIX: &str = ".expire";

/// An expired document found by [`ExpiryIndex::collect_expired`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiredEntry {
    /// Storage path of the document, e.g. `/a/b`.
    pub path: String,
    /// Location of the expiry record.
    pub record: PathBuf,
}

/// Deadline records keyed by storage path.
#[derive(Clone, Debug)]
pub struct ExpiryIndex {
    dir: PathBuf,
}

impl ExpiryIndex {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(META_DIR).join(EXPIRE_DIR),
        }
    }

    fn record_path(&self, path: &str) -> PathBuf {
        let mut record = join_storage_path(&self.dir, path).into_os_string();
        record.push(RECORD_SUFFIX);
        PathBuf::from(record)
    }

    /// Store the deadline for `path`, or drop the record when it never expires.
    pub async fn record(&self, path: &str, expiry: Expiry) -> StoreResult<()> {
        let Some(deadline) = expiry.deadline_from(Utc::now()) else {
            return self.forget(path).await;
        };
        let record = self.record_path(path);
        if let Some(parent) = record.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&record, deadline.to_rfc3339()).await?;
        debug!(path, deadline = %deadline, "expiry recorded");
        Ok(())
    }

    /// Remove the record for the document at `path`.
    pub async fn forget(&self, path: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.record_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the records of `path` and of everything below it.
    pub async fn forget_tree(&self, path: &str) -> StoreResult<()> {
        self.forget(path).await?;
        match tokio::fs::remove_dir_all(join_storage_path(&self.dir, path)).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_expired(&self, path: &str) -> bool {
        match tokio::fs::read_to_string(self.record_path(path)).await {
            Ok(contents) => deadline_passed(&contents, Utc::now()),
            Err(_) => false,
        }
    }

    /// Blocking variant of [`is_expired`](Self::is_expired) for enumeration
    /// running on the blocking pool.
    pub fn is_expired_blocking(&self, path: &str, now: DateTime<Utc>) -> bool {
        match std::fs::read_to_string(self.record_path(path)) {
            Ok(contents) => deadline_passed(&contents, now),
            Err(_) => false,
        }
    }

    /// Walk the records and return at most `limit` whose deadline has passed.
    ///
    /// Blocking; run on the blocking pool.
    pub fn collect_expired(&self, limit: usize, now: DateTime<Utc>) -> Vec<ExpiredEntry> {
        let mut expired = Vec::new();
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            if expired.len() >= limit {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable expiry record");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = self.storage_path_of(entry.path()) else {
                continue;
            };
            let due = std::fs::read_to_string(entry.path())
                .map(|contents| deadline_passed(&contents, now))
                .unwrap_or(false);
            if due {
                expired.push(ExpiredEntry {
                    path,
                    record: entry.path().to_path_buf(),
                });
            }
        }
        expired
    }

    fn storage_path_of(&self, record: &Path) -> Option<String> {
        let relative = record.strip_prefix(&self.dir).ok()?;
        let relative = relative.to_str()?.strip_suffix(RECORD_SUFFIX)?;
        let segments: Vec<&str> = relative
            .split(std::path::MAIN_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        Some(format!("/{}", segments.join("/")))
    }
}

fn deadline_passed(contents: &str, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(contents.trim()) {
        Ok(deadline) => deadline.with_timezone(&Utc) <= now,
        Err(e) => {
            warn!(error = %e, "ignoring malformed expiry record");
            false
        }
    }
}
