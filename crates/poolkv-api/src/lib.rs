//! # PoolKV
//!
//! An embeddable, persistent key-value engine with pluggable storage
//! backends.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use poolkv::{Config, Engine, Visit};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create (or reopen) a pool backed by the persistent B+ tree
//!     let engine = Engine::open("tree", Config::new("./my_pool").with_size(64 << 20))?;
//!
//!     engine.put(b"user:1:name", b"Alice")?;
//!     engine.put(b"user:1:email", b"alice@example.com")?;
//!
//!     if let Some(name) = engine.get(b"user:1:name")? {
//!         println!("Name: {}", name.to_string_lossy());
//!     }
//!
//!     // Visit keys in ascending order, stopping whenever we like
//!     engine.all(|key| {
//!         println!("{}", String::from_utf8_lossy(key));
//!         Visit::Continue
//!     })?;
//!
//!     engine.remove(b"user:1:email")?;
//!     engine.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! | Name | Durable | Notes |
//! |------|---------|-------|
//! | `tree` (`tree3`, `kvtree3`, `btree`) | yes | B+ tree over a transactional heap pool |
//! | `discard` (`blackhole`) | n/a | stores nothing, for measuring overhead |
//! | `vsmap` | no | in-memory sorted map, capacity limited by `size` |
//!
//! ## Concurrency
//!
//! An [`Engine`] is `Clone + Send + Sync`; clones share the same open pool.
//! Reads run concurrently, writes are serialized by the backend and are
//! durable when they return. Traversals see every entry present when they
//! started that is not removed before being reached; entries written during
//! a traversal may or may not be visited.
//!
//! A visitor must not call back into the engine that is driving it.
//!
//! Opening the same pool path from two engines at once is not supported.

use poolkv_storage::Backend;
use std::sync::{Arc, RwLock};

pub mod logging;

// Re-export core types
pub use poolkv_core::{ByteSeq, Config, Error, ErrorKind, Result, SyncMode, MIN_POOL_SIZE};

// Backend components
pub use poolkv_storage::{
    BackendFactory, BackendRegistry, DiscardBackend, KeyFilter, KeyRange, Scan, TreeBackend, Visit,
    VsMapBackend,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

struct EngineInner {
    /// Name the engine was opened with
    name: String,
    /// `None` once closed
    backend: RwLock<Option<Box<dyn Backend>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let backend = match self.backend.get_mut() {
            Ok(backend) => backend.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(backend) = backend {
            if let Err(e) = backend.close() {
                tracing::warn!(backend = %self.name, error = %e, "close on drop failed");
            }
        }
    }
}

/// Handle to an open pool.
///
/// Cheap to clone; every clone dispatches to the same backend instance.
/// The pool is closed by [`Engine::close`] or when the last clone is
/// dropped.
///
/// # Examples
///
/// ```rust
/// use poolkv::{Config, Engine};
///
/// let dir = tempfile::tempdir()?;
/// let engine = Engine::open("tree", Config::new(dir.path().join("pool")))?;
///
/// engine.put(b"key", b"value")?;
/// assert_eq!(engine.get(b"key")?.as_deref(), Some(&b"value"[..]));
/// assert_eq!(engine.count()?, 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens `backend` over the pool described by `config`, using the
    /// built-in backends.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownBackend`] if no backend is registered as `backend`
    /// - [`Error::Config`] if `config` fails validation
    /// - [`Error::Pool`] if the pool path is unusable, corrupt, or was
    ///   created with a different size
    pub fn open(backend: &str, config: Config) -> Result<Self> {
        Self::open_with_registry(&BackendRegistry::with_defaults(), backend, config)
    }

    /// Opens `backend` with options parsed from a JSON string such as
    /// `{"path": "/var/lib/pool", "size": 1073741824}`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use poolkv::Engine;
    ///
    /// let engine = Engine::open_json("discard", r#"{"path": "/nowhere"}"#)?;
    /// engine.put(b"k", b"v")?;
    /// assert_eq!(engine.count()?, 0);
    /// # Ok::<(), poolkv::Error>(())
    /// ```
    pub fn open_json(backend: &str, json: &str) -> Result<Self> {
        let registry = BackendRegistry::with_defaults();
        if !registry.contains(backend) {
            return Err(Error::UnknownBackend(backend.to_string()));
        }
        Self::open_with_registry(&registry, backend, Config::from_json(json)?)
    }

    /// Opens `backend` as resolved by `registry`
    pub fn open_with_registry(
        registry: &BackendRegistry,
        backend: &str,
        config: Config,
    ) -> Result<Self> {
        let opened = registry.open(backend, &config)?;
        tracing::info!(
            backend,
            path = %config.path.display(),
            size = ?config.size,
            "engine opened"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                name: backend.to_string(),
                backend: RwLock::new(Some(opened)),
            }),
        })
    }

    /// Run `f` against the open backend
    fn with_backend<T>(&self, f: impl FnOnce(&dyn Backend) -> Result<T>) -> Result<T> {
        let guard = self.inner.backend.read().map_err(|_| Error::LockPoisoned)?;
        match guard.as_deref() {
            Some(backend) => f(backend),
            None => Err(Error::Closed),
        }
    }

    /// Inserts or replaces the value stored under `key`.
    ///
    /// The write is durable when this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKey`] if `key` is empty
    /// - [`Error::OutOfSpace`] if the pool cannot hold the write; nothing is
    ///   changed and the call may be retried after freeing space
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        poolkv_core::validate_key(key)?;
        self.with_backend(|backend| backend.put(key, value))
    }

    /// Retrieves the value stored under `key`, `None` if absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use poolkv::{Config, Engine};
    ///
    /// let engine = Engine::open("vsmap", Config::new("/unused"))?;
    /// engine.put(b"greeting", b"Hello!")?;
    ///
    /// match engine.get(b"greeting")? {
    ///     Some(value) => println!("Found: {}", value.to_string_lossy()),
    ///     None => println!("Key not found"),
    /// }
    /// # Ok::<(), poolkv::Error>(())
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<ByteSeq>> {
        self.with_backend(|backend| backend.get(key))
    }

    /// Returns true if `key` is stored. The value is not copied.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.with_backend(|backend| backend.exists(key))
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// Removing an absent key is not an error.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.with_backend(|backend| backend.remove(key))
    }

    /// Number of stored entries
    pub fn count(&self) -> Result<u64> {
        self.with_backend(|backend| backend.count())
    }

    /// Number of entries with keys strictly greater than `key`
    pub fn count_above(&self, key: &[u8]) -> Result<u64> {
        self.count_range(KeyRange::above(key))
    }

    /// Number of entries with keys strictly less than `key`
    pub fn count_below(&self, key: &[u8]) -> Result<u64> {
        self.count_range(KeyRange::below(key))
    }

    /// Number of entries with keys strictly between `lo` and `hi`
    pub fn count_between(&self, lo: &[u8], hi: &[u8]) -> Result<u64> {
        self.count_range(KeyRange::between(lo, hi))
    }

    fn count_range(&self, range: KeyRange) -> Result<u64> {
        self.with_backend(|backend| backend.count_range(&range))
    }

    /// Visits every entry in ascending key order.
    ///
    /// The visitor returns [`Visit::Stop`] to end the traversal early, or
    /// `()`/[`Visit::Continue`] to keep going.
    pub fn each<F, R>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.each_scan(Scan::all(), visitor)
    }

    /// Visits every key in ascending order without loading values
    pub fn all<F, R>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> R,
        R: Into<Visit>,
    {
        self.all_scan(Scan::all(), visitor)
    }

    /// Visits entries whose whole key matches the regular expression
    /// `pattern`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] if `pattern` does not compile; the visitor
    /// is never called in that case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use poolkv::{Config, Engine};
    ///
    /// let engine = Engine::open("vsmap", Config::new("/unused"))?;
    /// engine.put(b"1234", b"a")?;
    /// engine.put(b"12345", b"b")?;
    ///
    /// let mut hits = Vec::new();
    /// engine.each_like("1234", |key, _| hits.push(key.to_vec()))?;
    /// assert_eq!(hits, vec![b"1234".to_vec()]);
    /// # Ok::<(), poolkv::Error>(())
    /// ```
    pub fn each_like<F, R>(&self, pattern: &str, visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.each_scan(Scan::all().with_filter(KeyFilter::new(pattern)?), visitor)
    }

    /// Visits keys that wholly match the regular expression `pattern`
    pub fn all_like<F, R>(&self, pattern: &str, visitor: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> R,
        R: Into<Visit>,
    {
        self.all_scan(Scan::all().with_filter(KeyFilter::new(pattern)?), visitor)
    }

    /// Visits entries with keys strictly greater than `key`
    pub fn each_above<F, R>(&self, key: &[u8], visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.each_scan(Scan::range(KeyRange::above(key)), visitor)
    }

    /// Visits entries with keys strictly less than `key`
    pub fn each_below<F, R>(&self, key: &[u8], visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.each_scan(Scan::range(KeyRange::below(key)), visitor)
    }

    /// Visits entries with keys strictly between `lo` and `hi`
    pub fn each_between<F, R>(&self, lo: &[u8], hi: &[u8], visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.each_scan(Scan::range(KeyRange::between(lo, hi)), visitor)
    }

    /// Visits entries admitted by an arbitrary [`Scan`]
    pub fn each_scan<F, R>(&self, scan: Scan, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> R,
        R: Into<Visit>,
    {
        self.with_backend(|backend| {
            backend.each(&scan, &mut |key, value| visitor(key, value).into())
        })
    }

    /// Visits keys admitted by an arbitrary [`Scan`]
    pub fn all_scan<F, R>(&self, scan: Scan, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> R,
        R: Into<Visit>,
    {
        self.with_backend(|backend| backend.all(&scan, &mut |key| visitor(key).into()))
    }

    /// Makes buffered state durable. For the tree backend this folds the
    /// write-ahead log into the pool image.
    pub fn flush(&self) -> Result<()> {
        self.with_backend(|backend| backend.flush())
    }

    /// Flushes and releases the backend.
    ///
    /// Every clone of this engine is closed; further calls fail with
    /// [`Error::Closed`]. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.backend.write().map_err(|_| Error::LockPoisoned)?;
        let Some(backend) = guard.take() else {
            return Ok(());
        };

        let result = backend.close();
        match &result {
            Ok(()) => tracing::info!(backend = %self.inner.name, "engine closed"),
            Err(e) => tracing::warn!(backend = %self.inner.name, error = %e, "engine close failed"),
        }
        result
    }

    /// Returns true once [`Engine::close`] has run
    pub fn is_closed(&self) -> bool {
        match self.inner.backend.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// The backend name this engine was opened with
    pub fn backend_name(&self) -> &str {
        &self.inner.name
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
