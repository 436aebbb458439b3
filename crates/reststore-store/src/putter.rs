//! Staged, atomically published document writes.
//!
//! A write streams into `<root>/.tmp/uploads/<name>-<uuid>.part` and is renamed
//! onto its final path once the caller closes the sink. Readers therefore see
//! either the previous document or the complete new one.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reststore_types::{DocumentResource, DocumentSink, ErrorChannel, Expiry, Resource, ResourceFault};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FileSystemConfig;
use crate::error::StoreError;
use crate::expiry::ExpiryIndex;

/// Lifecycle of a staged write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutterState {
    /// The staging file is open and accepts bytes.
    Streaming,
    /// The caller closed the sink; the rename is in progress.
    Publishing,
    /// The document is visible at its final path.
    Published,
    /// The write was abandoned and the staging file discarded.
    Discarded,
    /// Publishing gave up; the staging file awaits removal.
    Failed,
}

struct Staged {
    file: Option<File>,
    state: PutterState,
}

/// Single-use executor of one document write.
pub struct FilePutter {
    final_path: PathBuf,
    storage_path: String,
    staging_dir: PathBuf,
    retry_timeout: Duration,
    retry_delay: Duration,
    expire: Expiry,
    index: ExpiryIndex,
}

impl FilePutter {
    pub fn new(
        final_path: PathBuf,
        storage_path: String,
        staging_dir: PathBuf,
        config: &FileSystemConfig,
        expire: Expiry,
        index: ExpiryIndex,
    ) -> Self {
        Self {
            final_path,
            storage_path,
            staging_dir,
            retry_timeout: config.publish_retry_timeout,
            retry_delay: config.publish_retry_delay,
            expire,
            index,
        }
    }

    fn staging_path(&self) -> PathBuf {
        let base = self
            .final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.staging_dir.join(format!("{base}-{}.part", Uuid::new_v4()))
    }

    /// Open the staging file and hand out a writable document.
    ///
    /// Failures to prepare or open the staging file are returned as an error
    /// resource without retry.
    pub async fn execute(self) -> Resource {
        if let Err(e) = tokio::fs::create_dir_all(&self.staging_dir).await {
            error!(dir = %self.staging_dir.display(), error = %e, "failed to create staging directory");
            return Resource::failed(e.to_string());
        }
        let staging_path = self.staging_path();
        let file = match File::create(&staging_path).await {
            Ok(file) => file,
            Err(e) => {
                error!(file = %staging_path.display(), error = %e, "failed to open staging file");
                return Resource::failed(e.to_string());
            }
        };
        debug!(path = %self.storage_path, staging = %staging_path.display(), "write staged");

        let staged = Arc::new(Mutex::new(Staged {
            file: Some(file),
            state: PutterState::Streaming,
        }));
        let errors = ErrorChannel::new();
        subscribe_discard(&errors, Arc::clone(&staged), staging_path.clone());

        let sink = FileSink {
            staged,
            staging_path,
            errors: errors.clone(),
            putter: self,
        };
        let mut resource = Resource::document(DocumentResource::writable(Box::new(sink)));
        resource.errors = errors;
        resource
    }
}

/// Failure branch: once a fault is emitted, close and delete the staging file
/// unless the document was already published.
fn subscribe_discard(errors: &ErrorChannel, staged: Arc<Mutex<Staged>>, staging_path: PathBuf) {
    let handle = Handle::current();
    errors.subscribe(move |fault: &ResourceFault| {
        let staged = Arc::clone(&staged);
        let staging_path = staging_path.clone();
        let reason = fault.message.clone();
        handle.spawn(async move {
            let mut staged = staged.lock().await;
            if staged.state == PutterState::Published {
                return;
            }
            // The file may already be closed by a failed publish.
            drop(staged.file.take());
            staged.state = PutterState::Discarded;
            match tokio::fs::remove_file(&staging_path).await {
                Ok(()) => debug!(staging = %staging_path.display(), reason = %reason, "staged write discarded"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(staging = %staging_path.display(), error = %e, "failed to remove staging file"),
            }
        });
    });
}

struct FileSink {
    staged: Arc<Mutex<Staged>>,
    staging_path: PathBuf,
    errors: ErrorChannel,
    putter: FilePutter,
}

impl FileSink {
    async fn publish(&self) -> Result<(), StoreError> {
        let putter = &self.putter;
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match tokio::fs::rename(&self.staging_path, &putter.final_path).await {
                Ok(()) => break,
                Err(e) => {
                    let waited = started.elapsed();
                    if waited >= putter.retry_timeout {
                        return Err(StoreError::PublishTimeout {
                            path: putter.final_path.clone(),
                            waited_ms: waited.as_millis(),
                            reason: e.to_string(),
                        });
                    }
                    debug!(path = %putter.storage_path, attempts, error = %e, "publish failed, retrying");
                    tokio::time::sleep(putter.retry_delay).await;
                    if let Some(parent) = putter.final_path.parent() {
                        match tokio::fs::create_dir_all(parent).await {
                            Ok(()) => {}
                            // A concurrent delete can remove an ancestor mid-way.
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                                debug!(path = %putter.storage_path, error = %e, "parent vanished while recreating it");
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }
        info!(path = %putter.storage_path, attempts, "document published");
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for FileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let mut staged = self.staged.lock().await;
        if staged.state != PutterState::Streaming {
            return Err(StoreError::AlreadyClosed.into());
        }
        match staged.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(StoreError::AlreadyClosed.into()),
        }
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let mut staged = self.staged.lock().await;
        if staged.state != PutterState::Streaming {
            return Err(StoreError::AlreadyClosed.into());
        }
        let Some(mut file) = staged.file.take() else {
            return Err(StoreError::AlreadyClosed.into());
        };
        staged.state = PutterState::Publishing;

        let flushed = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = flushed {
            staged.state = PutterState::Failed;
            drop(staged);
            error!(path = %self.putter.storage_path, error = %e, "failed to flush staging file");
            self.errors.emit(&e);
            return Err(e);
        }

        match self.publish().await {
            Ok(()) => {
                staged.state = PutterState::Published;
                drop(staged);
                if let Err(e) = self
                    .putter
                    .index
                    .record(&self.putter.storage_path, self.putter.expire)
                    .await
                {
                    warn!(path = %self.putter.storage_path, error = %e, "failed to record expiry");
                }
                Ok(())
            }
            Err(e) => {
                staged.state = PutterState::Failed;
                drop(staged);
                error!(path = %self.putter.storage_path, error = %e, "publish gave up");
                self.errors.emit(ResourceFault::other(e.to_string()));
                Err(e.into())
            }
        }
    }
}
