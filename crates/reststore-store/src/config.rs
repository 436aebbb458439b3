use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the staging directory below the storage root.
pub const TMP_DIR: &str = ".tmp";
/// Name of the bookkeeping directory below the storage root.
pub const META_DIR: &str = ".meta";

/// Configuration of the filesystem engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Directory that holds the stored tree.
    pub root: PathBuf,
    /// How long a failed publish keeps retrying, measured from the first attempt.
    pub publish_retry_timeout: Duration,
    /// Pause between publish attempts.
    pub publish_retry_delay: Duration,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            publish_retry_timeout: Duration::from_millis(5000),
            publish_retry_delay: Duration::from_millis(50),
        }
    }
}

impl FileSystemConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}
