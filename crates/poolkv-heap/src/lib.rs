//! # PoolKV Heap
//!
//! Transactional slot heap backing a PoolKV pool.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of PoolKV.**
//!
//! Users should depend on the main `poolkv` crate instead, which provides
//! the stable public API. This crate's API may change without notice
//! between minor versions.
//!
//! ---
//!
//! The heap stores opaque byte slots addressed by non-zero `u64` handles.
//! All mutation goes through a scoped [`HeapTx`]: changes are staged in
//! memory and become visible (and durable) together on
//! [`HeapTx::commit`]. Dropping a transaction without committing discards
//! it.
//!
//! ## Durability
//!
//! A commit appends `BEGIN, STORE*, FREE*, ROOT?, COMMIT` to the write-ahead
//! log as one synced batch before the in-memory slot map changes. The full
//! slot map is periodically checkpointed into the `POOL` image and the log
//! is truncated. On open the image is loaded and every committed
//! transaction newer than it is replayed; a torn or uncommitted tail is
//! dropped.
//!
//! ```
//! use poolkv_core::Config;
//! use poolkv_heap::Heap;
//!
//! let dir = tempfile::tempdir()?;
//! let heap = Heap::open(&Config::new(dir.path().join("pool")))?;
//!
//! let mut tx = heap.begin();
//! let addr = tx.allocate(b"hello".to_vec());
//! tx.set_root(addr);
//! tx.commit()?;
//!
//! assert_eq!(heap.read(heap.root()?)?.as_deref(), Some(&b"hello"[..]));
//! heap.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Two `Heap` instances over the same directory in one process are not
//! supported; nothing guards against it.

pub mod heap;
pub mod image;
pub mod tx;

pub use heap::{Heap, HeapStats};
pub use image::PoolImage;
pub use tx::HeapTx;

/// Slot address inside the heap
pub type Addr = u64;

/// The null address: never allocated, reads as absent
pub const NULL_ADDR: Addr = 0;

/// Bookkeeping bytes charged against capacity for every live slot
pub const SLOT_OVERHEAD: u64 = 16;

/// Largest slot a transaction may store; callers split bigger data
pub const MAX_SLOT_SIZE: usize = 64 * 1024 * 1024;

// A STORE record for the largest slot must fit in one log frame
const _: () = assert!(MAX_SLOT_SIZE + 64 <= poolkv_wal::record::MAX_RECORD_SIZE);

/// Checkpoint image file name inside the pool directory
pub const POOL_FILE: &str = "POOL";

/// WAL directory name inside the pool directory
pub const WAL_DIR: &str = "wal";

/// Capacity charged for a slot holding `len` bytes
pub fn slot_cost(len: usize) -> u64 {
    len as u64 + SLOT_OVERHEAD
}
