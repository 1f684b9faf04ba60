// Sequential reader over every segment of a heap log
//
// A frame cut short at the end of a segment is a write the crash
// interrupted: it ends that segment and reading continues with the next one.
// A complete frame that fails its checksum is returned as corruption.

use crate::record::{frame_len, WalRecord, HEADER_LEN, MAX_RECORD_SIZE};
use crate::segment::{SegmentInfo, SegmentManager};
use poolkv_core::{Error, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Segment currently being read
struct OpenSegment {
    info: SegmentInfo,
    reader: BufReader<File>,
    offset: u64,
}

/// Outcome of reading one frame from a segment
enum Frame {
    Record(WalRecord, usize),
    End,
    Torn,
}

/// Reads records from all segments in replay order
pub struct WalReader {
    pending: VecDeque<SegmentInfo>,
    current: Option<OpenSegment>,
}

impl WalReader {
    /// Reader over the segments present in `wal_dir` right now
    pub fn new(wal_dir: &Path) -> Result<Self> {
        let segments = SegmentManager::new(wal_dir.to_path_buf()).list_segments()?;
        Ok(Self {
            pending: segments.into(),
            current: None,
        })
    }

    /// Next record, or `None` once every segment is exhausted
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }
            let Some(segment) = self.current.as_mut() else {
                return Ok(None);
            };

            match read_frame(&mut segment.reader)? {
                Frame::Record(record, len) => {
                    segment.offset += len as u64;
                    return Ok(Some(record));
                }
                Frame::End => self.current = None,
                Frame::Torn => {
                    tracing::warn!(
                        segment = %segment.info.path.display(),
                        offset = segment.offset,
                        "torn record at end of heap log segment"
                    );
                    self.current = None;
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    fn open_next(&mut self) -> Result<bool> {
        let Some(info) = self.pending.pop_front() else {
            return Ok(false);
        };
        let file = File::open(&info.path).map_err(|e| {
            Error::Storage(format!("Cannot open heap log segment {:?}: {}", info.path, e))
        })?;
        self.current = Some(OpenSegment {
            info,
            reader: BufReader::new(file),
            offset: 0,
        });
        Ok(true)
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn read_frame(reader: &mut impl Read) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    match fill(reader, &mut header)? {
        0 => return Ok(Frame::End),
        n if n < HEADER_LEN => return Ok(Frame::Torn),
        _ => {}
    }

    let len = frame_len(&header)?;
    if len > MAX_RECORD_SIZE {
        return Err(Error::Corruption(format!(
            "Record frame of {} bytes exceeds the {} byte limit",
            len, MAX_RECORD_SIZE
        )));
    }

    let mut frame = vec![0u8; len];
    frame[..HEADER_LEN].copy_from_slice(&header);
    if fill(reader, &mut frame[HEADER_LEN..])? < len - HEADER_LEN {
        return Ok(Frame::Torn);
    }
    Ok(Frame::Record(WalRecord::from_frame(&frame)?, len))
}

/// Read until `buf` is full or the file ends; returns the bytes read
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Storage(format!("Cannot read heap log: {}", e))),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordPayload, RecordType};
    use crate::{SyncMode, WalWriter};
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const LARGE_SEGMENT: u64 = 64 * 1024 * 1024;

    fn log_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let wal_dir = temp_dir.path().join("wal");
        (temp_dir, wal_dir)
    }

    fn last_segment(wal_dir: &Path) -> PathBuf {
        SegmentManager::new(wal_dir.to_path_buf())
            .latest()
            .unwrap()
            .expect("no segment")
            .path
    }

    #[test]
    fn test_no_segments() {
        let (_temp_dir, wal_dir) = log_dir();
        let mut reader = WalReader::new(&wal_dir).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_single_store() {
        let (_temp_dir, wal_dir) = log_dir();
        WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync)
            .unwrap()
            .append(WalRecord::store(1, b"slot one".to_vec()))
            .unwrap();

        let mut reader = WalReader::new(&wal_dir).unwrap();
        let record = reader.next().unwrap().unwrap();
        let RecordPayload::Store { addr, data } = record.payload else {
            panic!("expected a store, got {:?}", record);
        };
        assert_eq!((addr, data.as_slice()), (1, &b"slot one"[..]));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reads_across_segments() {
        let (_temp_dir, wal_dir) = log_dir();
        let mut writer = WalWriter::new(&wal_dir, 100, SyncMode::Sync).unwrap();
        for addr in 1..=20 {
            writer
                .append(WalRecord::store(addr, format!("value{}", addr).into_bytes()))
                .unwrap();
        }
        drop(writer);

        let segments = SegmentManager::new(wal_dir.clone()).list_segments().unwrap();
        assert!(segments.len() > 1);

        let records = WalReader::new(&wal_dir).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 20);
        assert_eq!(records[0], WalRecord::store(1, b"value1".to_vec()));
        assert_eq!(records[19], WalRecord::store(20, b"value20".to_vec()));
    }

    #[test]
    fn test_torn_tail_ends_segment() {
        let (_temp_dir, wal_dir) = log_dir();
        let segment = {
            let mut writer = WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync).unwrap();
            writer.append(WalRecord::free(1)).unwrap();
            writer.append(WalRecord::free(2)).unwrap();
            last_segment(&wal_dir)
        };

        let len = std::fs::metadata(&segment).unwrap().len();
        for cut in [5, 18] {
            let file = OpenOptions::new().write(true).open(&segment).unwrap();
            file.set_len(len - cut as u64).unwrap();
            let records = WalReader::new(&wal_dir).unwrap().read_all().unwrap();
            assert_eq!(records, vec![WalRecord::free(1)], "cut {}", cut);
        }
    }

    #[test]
    fn test_bad_checksum_is_an_error() {
        let (_temp_dir, wal_dir) = log_dir();
        let segment = {
            let mut writer = WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync).unwrap();
            writer.append(WalRecord::store(4, b"payload".to_vec())).unwrap();
            last_segment(&wal_dir)
        };

        let mut bytes = std::fs::read(&segment).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&segment, bytes).unwrap();

        let err = WalReader::new(&wal_dir).unwrap().read_all().unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_transaction_batch_order() {
        let (_temp_dir, wal_dir) = log_dir();
        WalWriter::new(&wal_dir, LARGE_SEGMENT, SyncMode::Sync)
            .unwrap()
            .append_batch(&[
                WalRecord::begin_tx(1),
                WalRecord::store(1, b"a".to_vec()),
                WalRecord::store(2, b"b".to_vec()),
                WalRecord::commit_tx(1),
            ])
            .unwrap();

        let kinds: Vec<RecordType> = WalReader::new(&wal_dir)
            .unwrap()
            .map(|record| record.unwrap().record_type())
            .collect();
        assert_eq!(
            kinds,
            vec![
                RecordType::BeginTx,
                RecordType::Store,
                RecordType::Store,
                RecordType::CommitTx
            ]
        );
    }
}
