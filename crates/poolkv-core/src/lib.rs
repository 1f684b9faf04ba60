//! # PoolKV Core
//!
//! Core types shared by every PoolKV crate: the error taxonomy, the byte
//! sequence used for keys and values, pool configuration and on-disk
//! format constants.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytes;
pub mod config;
pub mod error;
pub mod format_version;

pub use bytes::ByteSeq;
pub use config::{Config, SyncMode, DEFAULT_CHECKPOINT_BYTES, MIN_POOL_SIZE};
pub use error::{Error, ErrorKind, Result};

/// Rejects keys the engine cannot store.
///
/// The only disallowed key is the empty one.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}
