// Shared fixture for WAL integration tests: a temporary log directory plus
// helpers that damage segments the way a crash or bad disk would.

use poolkv_wal::{SyncMode, WalConfig, WalManager};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tempfile::TempDir;

/// Small segments so rotation is reachable from tests
#[allow(dead_code)]
pub const TEST_SEGMENT_SIZE: u64 = 1024 * 1024;

pub struct WalTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub wal_path: PathBuf,
}

impl WalTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let wal_path = temp_dir.path().join("wal");
        Self { temp_dir, wal_path }
    }

    /// Log configuration rooted at this fixture
    pub fn config(&self, sync_mode: SyncMode) -> WalConfig {
        WalConfig {
            wal_dir: self.wal_path.clone(),
            sync_mode,
            max_segment_size: TEST_SEGMENT_SIZE,
        }
    }

    /// Open a log with `sync_mode`, run `body` against it, then close it
    #[allow(dead_code)]
    pub fn write_log(&self, sync_mode: SyncMode, body: impl FnOnce(&mut WalManager)) {
        let mut wal = WalManager::new(self.config(sync_mode)).expect("Failed to create WAL manager");
        wal.open().expect("Failed to open WAL");
        body(&mut wal);
        wal.close().expect("Failed to close WAL");
    }

    /// Segment files in replay order
    #[allow(dead_code)]
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.wal_path)
            .expect("Failed to read WAL directory")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "log"))
            .collect();
        paths.sort();
        paths
    }

    fn last_segment(&self) -> PathBuf {
        self.segment_paths()
            .pop()
            .expect("Expected at least one WAL segment")
    }

    /// Cut `bytes` off the end of the newest segment
    #[allow(dead_code)]
    pub fn truncate_last_segment(&self, bytes: u64) {
        let path = self.last_segment();
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - bytes)
            .unwrap();
    }

    /// Flip the byte `from_end` bytes before the end of the newest segment
    #[allow(dead_code)]
    pub fn corrupt_last_segment(&self, from_end: usize) {
        let path = self.last_segment();
        let mut bytes = fs::read(&path).unwrap();
        let idx = bytes.len() - from_end;
        bytes[idx] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
    }
}

impl Default for WalTestFixture {
    fn default() -> Self {
        Self::new()
    }
}
