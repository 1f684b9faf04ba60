//! # PoolKV Storage
//!
//! Storage backends for PoolKV.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of PoolKV.**
//!
//! Users should depend on the main [`poolkv`](https://crates.io/crates/poolkv) crate
//! instead, which provides the stable public API. This crate's API may change
//! without notice between minor versions.
//!
//! ---
//!
//! Every backend implements [`Backend`] and is opened by name through a
//! [`BackendRegistry`]:
//!
//! - **tree**: persistent B+ tree over a transactional heap pool
//! - **discard**: accepts writes and stores nothing
//! - **vsmap**: volatile sorted map, lost on close
//!
//! ## Architecture
//!
//! ```text
//! Engine → BackendRegistry → Box<dyn Backend>
//!                                 ↓
//!                  TreeBackend → Heap (image + WAL)
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod discard;
pub mod registry;
pub mod scan;
pub mod tree;
pub mod vsmap;

pub use backend::{Backend, EntryVisitor, KeyVisitor, Visit};
pub use discard::DiscardBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use scan::{KeyFilter, KeyRange, Scan};
pub use tree::TreeBackend;
pub use vsmap::VsMapBackend;
