// Appends heap transactions to the newest log segment
use crate::record::WalRecord;
use crate::segment::{segment_file_name, SegmentManager};
use crate::SyncMode;
use poolkv_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct WalWriter {
    wal_dir: PathBuf,
    out: BufWriter<File>,
    segment: PathBuf,
    segment_size: u64,
    max_segment_size: u64,
    sync_mode: SyncMode,
    /// Records appended to this log, counting from the newest segment's name
    sequence: u64,
    bytes_written: u64,
}

fn open_segment(path: &Path) -> Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Pool(format!("Cannot open heap log segment {:?}: {}", path, e)))?;
    let size = file
        .metadata()
        .map_err(|e| Error::Pool(format!("Cannot stat heap log segment {:?}: {}", path, e)))?
        .len();
    Ok((BufWriter::new(file), size))
}

impl WalWriter {
    /// Open `wal_dir` for appending, creating it if needed.
    ///
    /// Appends continue in the newest existing segment so that replay order
    /// stays append order.
    pub fn new(wal_dir: &Path, max_segment_size: u64, sync_mode: SyncMode) -> Result<Self> {
        std::fs::create_dir_all(wal_dir).map_err(|e| {
            Error::Pool(format!("Cannot create heap log directory {:?}: {}", wal_dir, e))
        })?;

        let sequence = SegmentManager::new(wal_dir.to_path_buf())
            .latest()?
            .map_or(0, |segment| segment.sequence);
        let segment = wal_dir.join(segment_file_name(sequence));
        let (out, segment_size) = open_segment(&segment)?;

        Ok(Self {
            wal_dir: wal_dir.to_path_buf(),
            out,
            segment,
            segment_size,
            max_segment_size,
            sync_mode,
            sequence,
            bytes_written: 0,
        })
    }

    pub fn append(&mut self, record: WalRecord) -> Result<u64> {
        self.append_batch(std::slice::from_ref(&record))
    }

    /// Append `records` as one unit.
    ///
    /// A batch is never split across segments. Under [`SyncMode::Sync`] it
    /// costs one fsync; otherwise it is handed to the OS before returning.
    /// Returns the sequence after the batch.
    pub fn append_batch(&mut self, records: &[WalRecord]) -> Result<u64> {
        let mut batch = Vec::new();
        for record in records {
            batch.extend(record.encode()?);
        }
        let len = batch.len() as u64;

        if self.segment_size > 0 && self.segment_size + len > self.max_segment_size {
            self.rotate()?;
        }

        self.out
            .write_all(&batch)
            .map_err(|e| Error::Storage(format!("Cannot append to heap log: {}", e)))?;
        self.segment_size += len;
        self.bytes_written += len;
        self.sequence += records.len() as u64;

        match self.sync_mode {
            SyncMode::Sync => self.sync()?,
            SyncMode::Async | SyncMode::None => self.flush()?,
        }
        Ok(self.sequence)
    }

    fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|e| Error::Storage(format!("Cannot flush heap log: {}", e)))
    }

    /// Flush buffered records and, unless syncing is off, fsync them
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        if self.sync_mode != SyncMode::None {
            self.out
                .get_ref()
                .sync_all()
                .map_err(|e| Error::Storage(format!("Cannot sync heap log: {}", e)))?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.sync()?;
        let next = self.wal_dir.join(segment_file_name(self.sequence + 1));
        let (out, size) = open_segment(&next)?;
        tracing::debug!(segment = %next.display(), "heap log segment rotated");

        self.out = out;
        self.segment = next;
        self.segment_size = size;
        Ok(())
    }

    /// Bytes appended since this writer was opened
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!(error = %e, "heap log sync on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentInfo;
    use tempfile::TempDir;

    const LARGE_SEGMENT: u64 = 64 * 1024 * 1024;

    fn log_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let wal_dir = temp_dir.path().join("wal");
        (temp_dir, wal_dir)
    }

    fn commit(tx_id: u64, addr: u64) -> Vec<WalRecord> {
        vec![
            WalRecord::begin_tx(tx_id),
            WalRecord::store(addr, format!("slot{}", addr).into_bytes()),
            WalRecord::set_root(addr),
            WalRecord::commit_tx(tx_id),
        ]
    }

    fn newest(wal_dir: &Path) -> SegmentInfo {
        SegmentManager::new(wal_dir.to_path_buf())
            .latest()
            .unwrap()
            .expect("no segment")
    }

    #[test]
    fn test_new_creates_first_segment() {
        let (_temp_dir, wal_dir) = log_dir();
        let _writer = WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync).unwrap();
        let segment = newest(&wal_dir);
        assert!(segment.path.exists());
        assert_eq!(segment.sequence, 0);
        assert_eq!(segment.size, 0);
    }

    #[test]
    fn test_sequence_counts_records() {
        let (_temp_dir, wal_dir) = log_dir();
        let mut writer = WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync).unwrap();

        assert_eq!(writer.append_batch(&commit(1, 1)).unwrap(), 4);
        assert_eq!(writer.append_batch(&commit(2, 2)).unwrap(), 8);
        assert_eq!(writer.bytes_written(), newest(&wal_dir).size);
    }

    #[test]
    fn test_batches_stay_in_one_segment() {
        let (_temp_dir, wal_dir) = log_dir();
        // Smaller than one batch: every batch after the first rotates
        let mut writer = WalWriter::new(&wal_dir, 64, SyncMode::Sync).unwrap();
        let first = newest(&wal_dir).path;

        for i in 1..=5 {
            writer.append_batch(&commit(i, i)).unwrap();
        }

        assert_ne!(newest(&wal_dir).path, first);
        let segments = SegmentManager::new(wal_dir).list_segments().unwrap();
        assert_eq!(segments.len(), 5);
        assert!(segments.iter().all(|s| s.size == segments[0].size));
    }

    #[test]
    fn test_every_sync_mode_appends() {
        for sync_mode in [SyncMode::Sync, SyncMode::Async, SyncMode::None] {
            let (_temp_dir, wal_dir) = log_dir();
            let mut writer = WalWriter::new(&wal_dir, LARGE_SEGMENT, sync_mode).unwrap();
            writer.append(WalRecord::free(9)).unwrap();
            writer.sync().unwrap();
            assert!(newest(&wal_dir).size > 0);
        }
    }

    #[test]
    fn test_reopen_continues_newest_segment() {
        let (_temp_dir, wal_dir) = log_dir();
        {
            let mut writer = WalWriter::new(&wal_dir, 64, SyncMode::Sync).unwrap();
            for i in 1..=3 {
                writer.append_batch(&commit(i, i)).unwrap();
            }
        }
        let last = newest(&wal_dir);

        let mut writer = WalWriter::new(&wal_dir, 64, SyncMode::Sync).unwrap();
        assert_eq!(newest(&wal_dir), last);

        // The reopened writer counts on from the newest segment's name
        writer.append_batch(&commit(4, 4)).unwrap();
        assert!(newest(&wal_dir).sequence > last.sequence);
    }
}
