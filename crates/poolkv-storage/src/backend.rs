//! The contract every storage backend implements.

use crate::scan::{KeyRange, Scan};
use poolkv_core::{ByteSeq, Result};

/// Visitor verdict: keep going or end the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Deliver the next entry
    Continue,
    /// Stop the traversal; the call returns `Ok(())`
    Stop,
}

impl From<()> for Visit {
    fn from(_: ()) -> Self {
        Visit::Continue
    }
}

/// Callback receiving `(key, value)` for each visited entry
pub type EntryVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Visit + 'a;

/// Callback receiving the key of each visited entry
pub type KeyVisitor<'a> = dyn FnMut(&[u8]) -> Visit + 'a;

/// A storage structure behind the engine.
///
/// Implementations are shared across threads: reads may run concurrently
/// with each other and with writes, and every mutating call is durable
/// (for persistent backends) when it returns.
///
/// Traversal visits entries in ascending key order. A visitor must not call
/// back into the same backend; doing so is unsupported and its effect on
/// the rest of the pass is undefined.
pub trait Backend: Send + Sync {
    /// Registry name of this backend
    fn name(&self) -> &'static str;

    /// Insert or replace the value stored under `key`
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Look up the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<ByteSeq>>;

    /// Returns true if `key` is stored, without copying its value
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Remove `key`, returning whether it was present
    fn remove(&self, key: &[u8]) -> Result<bool>;

    /// Number of stored entries
    fn count(&self) -> Result<u64>;

    /// Number of stored entries inside `range`
    fn count_range(&self, range: &KeyRange) -> Result<u64> {
        let mut count = 0u64;
        self.all(&Scan::range(range.clone()), &mut |_| {
            count += 1;
            Visit::Continue
        })?;
        Ok(count)
    }

    /// Visit `(key, value)` for every entry admitted by `scan`
    fn each(&self, scan: &Scan, visitor: &mut EntryVisitor<'_>) -> Result<()>;

    /// Visit the key of every entry admitted by `scan`
    fn all(&self, scan: &Scan, visitor: &mut KeyVisitor<'_>) -> Result<()>;

    /// Make buffered state durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Make buffered state durable and release the backend's resources
    fn close(&self) -> Result<()>;
}
