//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration constants.
pub mod defaults {
    /// Default block size: 128 MB. Writes are admitted in units of at most
    /// one block.
    pub const BLOCK_SIZE: u64 = 128 * 1024 * 1024;

    /// Sync the edit log to stable storage on every appended record.
    pub const SYNC_ON_APPEND: bool = true;

    /// File name of the edit log inside the data directory.
    pub const EDIT_LOG_FILE: &str = "edits.log";

    /// File name of the checkpoint image inside the data directory.
    pub const CHECKPOINT_FILE: &str = "fsimage";
}

/// Configuration of a [`crate::engine::QuotaEngine`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the edit log and checkpoint image.
    pub data_dir: PathBuf,
    /// Block size in bytes; the admission unit for file writes.
    pub block_size: u64,
    /// Whether to fsync the edit log after every record.
    pub sync_on_append: bool,
}

impl EngineConfig {
    /// Creates a configuration with defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            block_size: defaults::BLOCK_SIZE,
            sync_on_append: defaults::SYNC_ON_APPEND,
        }
    }

    /// Overrides the block size.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Overrides the edit log fsync policy.
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    /// Path of the edit log file.
    pub fn edit_log_path(&self) -> PathBuf {
        self.data_dir.join(defaults::EDIT_LOG_FILE)
    }

    /// Path of the checkpoint image file.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(defaults::CHECKPOINT_FILE)
    }

    /// The data directory as a path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
