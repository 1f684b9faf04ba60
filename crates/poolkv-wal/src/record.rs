// Heap log records
//
// Frame: [len: u32 LE][kind: u8][body: len - 1 bytes][crc32(kind ++ body): u32 LE]
// The body is the bincode encoding of the record's payload.
//
// Kinds: 1 STORE, 2 FREE, 3 BEGIN, 4 COMMIT, 5 ROOT

use poolkv_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Bytes of framing around every body (length + kind + crc)
pub const FRAME_OVERHEAD: usize = 9;

/// Bytes before the body: the length prefix and the kind byte
pub(crate) const HEADER_LEN: usize = 5;

/// Largest frame that is written or read back
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Kind byte of a framed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    Store = 1,
    Free = 2,
    BeginTx = 3,
    CommitTx = 4,
    SetRoot = 5,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        let kind = match byte {
            1 => RecordType::Store,
            2 => RecordType::Free,
            3 => RecordType::BeginTx,
            4 => RecordType::CommitTx,
            5 => RecordType::SetRoot,
            other => {
                return Err(Error::Corruption(format!(
                    "Unknown heap log record kind {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// What a record does to the heap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// Full new contents of slot `addr`
    Store { addr: u64, data: Vec<u8> },
    /// Slot `addr` is released
    Free { addr: u64 },
    BeginTx { tx_id: u64 },
    CommitTx { tx_id: u64 },
    /// The root handle now points at `addr`
    SetRoot { addr: u64 },
}

impl RecordPayload {
    fn kind(&self) -> RecordType {
        match self {
            RecordPayload::Store { .. } => RecordType::Store,
            RecordPayload::Free { .. } => RecordType::Free,
            RecordPayload::BeginTx { .. } => RecordType::BeginTx,
            RecordPayload::CommitTx { .. } => RecordType::CommitTx,
            RecordPayload::SetRoot { .. } => RecordType::SetRoot,
        }
    }
}

/// One entry of the heap log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub payload: RecordPayload,
}

impl From<RecordPayload> for WalRecord {
    fn from(payload: RecordPayload) -> Self {
        Self { payload }
    }
}

impl WalRecord {
    pub fn store(addr: u64, data: Vec<u8>) -> Self {
        RecordPayload::Store { addr, data }.into()
    }

    pub fn free(addr: u64) -> Self {
        RecordPayload::Free { addr }.into()
    }

    pub fn begin_tx(tx_id: u64) -> Self {
        RecordPayload::BeginTx { tx_id }.into()
    }

    pub fn commit_tx(tx_id: u64) -> Self {
        RecordPayload::CommitTx { tx_id }.into()
    }

    pub fn set_root(addr: u64) -> Self {
        RecordPayload::SetRoot { addr }.into()
    }

    /// Kind byte this record is framed with
    pub fn record_type(&self) -> RecordType {
        self.payload.kind()
    }

    /// STORE, FREE and ROOT change heap state; markers do not
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.record_type(),
            RecordType::Store | RecordType::Free | RecordType::SetRoot
        )
    }

    /// Frame this record for appending to a segment.
    ///
    /// Frames longer than [`MAX_RECORD_SIZE`] are refused, since they could
    /// not be read back.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.payload).map_err(|e| {
            Error::Serialization(format!("Cannot encode {:?} record: {}", self.record_type(), e))
        })?;
        let kind = self.record_type() as u8;

        let len = length_prefix(body.len())?;

        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.push(kind);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum(kind, &body).to_le_bytes());
        Ok(frame)
    }

    /// Decode the frame at the start of `data`.
    ///
    /// Returns the record and the number of bytes it occupied. A frame cut
    /// short is a [`Error::Serialization`]; a frame that is complete but
    /// wrong is [`Error::Corruption`].
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let Some(header) = data.get(..HEADER_LEN) else {
            return Err(Error::Serialization(format!(
                "Incomplete record header ({} bytes)",
                data.len()
            )));
        };
        let frame_len = frame_len(header)?;
        let frame = data.get(..frame_len).ok_or_else(|| {
            Error::Serialization(format!(
                "Incomplete record: frame of {} bytes, {} available",
                frame_len,
                data.len()
            ))
        })?;
        Ok((Self::from_frame(frame)?, frame_len))
    }

    /// Check and decode one complete frame
    pub(crate) fn from_frame(frame: &[u8]) -> Result<Self> {
        let (head, crc) = frame.split_at(frame.len() - 4);
        let kind = head[4];
        let body = &head[HEADER_LEN..];

        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let computed = checksum(kind, body);
        if stored != computed {
            return Err(Error::Corruption(format!(
                "Record checksum {:#010x} does not match contents ({:#010x})",
                stored, computed
            )));
        }

        let expected = RecordType::try_from(kind)?;
        let payload: RecordPayload = bincode::deserialize(body)
            .map_err(|e| Error::Corruption(format!("Undecodable {:?} record: {}", expected, e)))?;
        if payload.kind() != expected {
            return Err(Error::Corruption(format!(
                "{:?} frame carries a {:?} payload",
                expected,
                payload.kind()
            )));
        }
        Ok(payload.into())
    }
}

/// Length prefix of a frame around `body_len` bytes
fn length_prefix(body_len: usize) -> Result<u32> {
    body_len
        .checked_add(FRAME_OVERHEAD)
        .filter(|frame_size| *frame_size <= MAX_RECORD_SIZE)
        .and_then(|_| u32::try_from(body_len + 1).ok())
        .ok_or_else(|| {
            Error::Serialization(format!(
                "Record body of {} bytes exceeds the {} byte frame limit",
                body_len, MAX_RECORD_SIZE
            ))
        })
}

/// Total frame length announced by a record header
pub(crate) fn frame_len(header: &[u8]) -> Result<usize> {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len == 0 {
        return Err(Error::Corruption("Record with empty length".to_string()));
    }
    Ok(len + 8)
}

fn checksum(kind: u8, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(body);
    hasher.finalize()
}
