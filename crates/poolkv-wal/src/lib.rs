//! # PoolKV WAL
//!
//! Redo log for the transactional heap. Every heap commit is appended as one
//! `BEGIN`, `STORE`/`FREE`/`ROOT`..., `COMMIT` batch; after a crash the heap
//! replays the committed batches newer than its last checkpoint.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of PoolKV.**
//!
//! Users should depend on the main `poolkv` crate instead, which provides
//! the stable public API. This crate's API may change without notice
//! between minor versions.

use poolkv_core::{Error, Result};
use std::path::PathBuf;

pub mod reader;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod writer;

pub use poolkv_core::SyncMode;
pub use reader::WalReader;
pub use record::{RecordPayload, RecordType, WalRecord};
pub use recovery::{CommittedTx, RecoveryManager};
pub use segment::{SegmentInfo, SegmentManager};
pub use writer::WalWriter;

/// Segment size at which appends move to a new file
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WalConfig {
    /// When appended batches are forced to disk
    pub sync_mode: SyncMode,
    /// Segment size that triggers rotation
    pub max_segment_size: u64,
    /// Directory holding the segments
    pub wal_dir: PathBuf,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Sync,
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            wal_dir: PathBuf::from("wal"),
        }
    }
}

/// Owns the heap log directory: appends while open, replays while closed
pub struct WalManager {
    config: WalConfig,
    segments: SegmentManager,
    writer: Option<WalWriter>,
}

impl WalManager {
    pub fn new(config: WalConfig) -> Result<Self> {
        let segments = SegmentManager::new(config.wal_dir.clone());
        Ok(Self {
            config,
            segments,
            writer: None,
        })
    }

    /// Start appending to the newest segment
    pub fn open(&mut self) -> Result<()> {
        let WalConfig {
            sync_mode,
            max_segment_size,
            ref wal_dir,
        } = self.config;
        self.writer = Some(WalWriter::new(wal_dir, max_segment_size, sync_mode)?);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn writer(&mut self) -> Result<&mut WalWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::Storage("Heap log is not open for writing".to_string()))
    }

    /// Append a single record outside any transaction
    pub fn append(&mut self, record: WalRecord) -> Result<u64> {
        self.writer()?.append(record)
    }

    /// Log transaction `tx_id` as `BEGIN`, `records`, `COMMIT` in one batch
    pub fn append_transaction(&mut self, tx_id: u64, records: Vec<WalRecord>) -> Result<u64> {
        let batch: Vec<WalRecord> = std::iter::once(WalRecord::begin_tx(tx_id))
            .chain(records)
            .chain(std::iter::once(WalRecord::commit_tx(tx_id)))
            .collect();
        self.writer()?.append_batch(&batch)
    }

    pub fn sync(&mut self) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Sync and stop appending. Closing a closed log does nothing.
    pub fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Delete every segment once a checkpoint has made them redundant.
    ///
    /// An open log is reopened on a fresh, empty segment.
    pub fn reset(&mut self) -> Result<usize> {
        let reopen = self.is_open();
        self.close()?;
        let removed = self.segments.cleanup_all()?;
        if reopen {
            self.open()?;
        }
        Ok(removed)
    }

    fn recovery(&self) -> Result<RecoveryManager> {
        RecoveryManager::new(self.config.clone())
    }

    /// Committed transactions in commit order; uncommitted ones are dropped
    pub fn recover(&self) -> Result<Vec<CommittedTx>> {
        self.recovery()?.recover()
    }

    /// Committed transactions with an id above `after`
    pub fn recover_after(&self, after: u64) -> Result<Vec<CommittedTx>> {
        self.recovery()?.recover_after(after)
    }

    /// Bytes currently on disk across all segments
    pub fn size_bytes(&self) -> Result<u64> {
        self.segments.total_size()
    }

    /// Bytes appended since the last open or reset
    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map_or(0, WalWriter::bytes_written)
    }

    pub fn segment_manager(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }
}
