//! Engine configuration.
//!
//! A [`Config`] is either built in code or parsed from the JSON options
//! string used by language bindings:
//!
//! ```
//! use poolkv_core::Config;
//!
//! let config = Config::from_json(r#"{"path": "/tmp/pool", "size": 1073741824}"#)?;
//! assert_eq!(config.size, Some(1 << 30));
//! # Ok::<(), poolkv_core::Error>(())
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest capacity accepted for a fixed-size pool (4 KiB)
pub const MIN_POOL_SIZE: u64 = 4 * 1024;

/// Default WAL volume that triggers a checkpoint (64 MiB)
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 64 * 1024 * 1024;

/// Sync mode for WAL writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// fsync after every committed transaction (strongest durability)
    #[default]
    Sync,
    /// Buffer writes, fsync on segment boundaries and checkpoints
    Async,
    /// No fsync (fastest, unsafe for power loss)
    None,
}

/// Pool configuration.
///
/// # Validation Rules
///
/// - `path` must not be empty
/// - `size`, when set, must be >= [`MIN_POOL_SIZE`]
/// - `checkpoint_bytes` must be non-zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Filesystem location of the pool
    pub path: PathBuf,
    /// Capacity in bytes. Only used when the pool is created; `None`
    /// creates a pool that grows on demand.
    pub size: Option<u64>,
    /// Durability of individual commits
    pub sync_mode: SyncMode,
    /// WAL volume after which the heap image is rewritten
    pub checkpoint_bytes: u64,
}

/// Wire form of the JSON options string.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonOptions {
    path: PathBuf,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sync: Option<SyncMode>,
    #[serde(default)]
    checkpoint_bytes: Option<u64>,
}

impl Config {
    /// Creates a grow-on-demand configuration for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
            sync_mode: SyncMode::default(),
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
        }
    }

    /// Set a fixed pool capacity
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the WAL sync mode
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Set the checkpoint threshold
    pub fn with_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_bytes = bytes;
        self
    }

    /// Parses and validates a JSON options string.
    ///
    /// Unknown fields and malformed JSON fail with [`Error::Config`].
    pub fn from_json(json: &str) -> Result<Self> {
        let options: JsonOptions =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;

        let mut config = Config::new(options.path);
        config.size = options.size;
        if let Some(sync_mode) = options.sync {
            config.sync_mode = sync_mode;
        }
        if let Some(bytes) = options.checkpoint_bytes {
            config.checkpoint_bytes = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("path must not be empty".to_string()));
        }
        if let Some(size) = self.size {
            if size < MIN_POOL_SIZE {
                return Err(Error::Config(format!(
                    "size must be >= {} bytes, got {}",
                    MIN_POOL_SIZE, size
                )));
            }
        }
        if self.checkpoint_bytes == 0 {
            return Err(Error::Config(
                "checkpoint_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
