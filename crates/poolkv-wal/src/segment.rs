// Heap log segment files
//
// A segment is named wal-{first sequence:016x}.log. Segments are replayed in
// sequence order and removed together once a checkpoint covers them.

use poolkv_core::{Error, Result};
use std::fs;
use std::path::PathBuf;

const PREFIX: &str = "wal-";
const SUFFIX: &str = ".log";

/// File name of the segment starting at `sequence`
pub(crate) fn segment_file_name(sequence: u64) -> String {
    format!("{PREFIX}{sequence:016x}{SUFFIX}")
}

/// Starting sequence encoded in a segment file name
pub(crate) fn parse_segment_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// One segment file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    /// Starting sequence from the file name
    pub sequence: u64,
    /// Size in bytes when listed
    pub size: u64,
}

/// Lists, measures and deletes the segments of one log directory
#[derive(Debug, Clone)]
pub struct SegmentManager {
    wal_dir: PathBuf,
}

impl SegmentManager {
    pub fn new(wal_dir: PathBuf) -> Self {
        Self { wal_dir }
    }

    /// Segments in replay order. A missing directory has none.
    ///
    /// Files that are not segments are ignored.
    pub fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        let entries = match fs::read_dir(&self.wal_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Cannot list heap log {:?}: {}",
                    self.wal_dir, e
                )))
            }
        };

        let mut segments = Vec::new();
        for entry in entries.flatten() {
            let Some(sequence) = entry.file_name().to_str().and_then(parse_segment_sequence)
            else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            segments.push(SegmentInfo {
                path: entry.path(),
                sequence,
                size,
            });
        }
        segments.sort_unstable_by_key(|segment| segment.sequence);
        Ok(segments)
    }

    /// Highest-sequence segment, if any
    pub fn latest(&self) -> Result<Option<SegmentInfo>> {
        Ok(self.list_segments()?.pop())
    }

    pub fn total_size(&self) -> Result<u64> {
        Ok(self.list_segments()?.iter().map(|s| s.size).sum())
    }

    /// Delete every segment, returning how many were removed.
    ///
    /// Only valid once the pool image holds every committed transaction.
    pub fn cleanup_all(&self) -> Result<usize> {
        let segments = self.list_segments()?;
        for segment in &segments {
            fs::remove_file(&segment.path).map_err(|e| {
                Error::Storage(format!("Cannot delete segment {:?}: {}", segment.path, e))
            })?;
        }
        if !segments.is_empty() {
            tracing::debug!(removed = segments.len(), "heap log segments deleted");
        }
        Ok(segments.len())
    }
}
