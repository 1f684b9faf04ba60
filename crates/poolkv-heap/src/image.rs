// Pool image - the checkpointed state of the heap
//
// File layout:
//   [magic: u32 LE][version: u16 LE][crc32: u32 LE][body_len: u64 LE][body: bincode]
//
// The image is replaced atomically: written to POOL.tmp, fsynced, then
// renamed over POOL. A crash at any point leaves either the old or the new
// image in place.

use crate::Addr;
use poolkv_core::format_version::{magic, POOL_FORMAT_VERSION, POOL_VERSIONS};
use poolkv_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

const HEADER_LEN: usize = 4 + 2 + 4 + 8;

/// Heap state as of the last checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolImage {
    /// Highest transaction id contained in this image
    pub last_tx_id: u64,
    /// Next unused slot address
    pub next_addr: Addr,
    /// Root handle
    pub root: Addr,
    /// Capacity in bytes, `None` for a grow-on-demand pool
    pub capacity: Option<u64>,
    /// Live slots in address order
    pub slots: Vec<(Addr, Vec<u8>)>,
}

impl PoolImage {
    /// Load an image, returning `None` if the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Pool(format!(
                    "Failed to read pool image {:?}: {}",
                    path, e
                )))
            }
        };

        Self::decode(&contents).map(Some)
    }

    /// Decode an image from its file contents
    pub fn decode(contents: &[u8]) -> Result<Self> {
        if contents.len() < HEADER_LEN {
            return Err(Error::Corruption(format!(
                "Pool image too short: {} bytes",
                contents.len()
            )));
        }

        let file_magic = u32::from_le_bytes([contents[0], contents[1], contents[2], contents[3]]);
        if file_magic != magic::POOL {
            return Err(Error::Pool(format!(
                "Not a pool image (magic {:#010x})",
                file_magic
            )));
        }

        let version = u16::from_le_bytes([contents[4], contents[5]]);
        if !POOL_VERSIONS.contains(version) {
            return Err(Error::Pool(format!(
                "Unsupported pool format version {} (supported up to {})",
                version, POOL_FORMAT_VERSION
            )));
        }

        let expected_crc =
            u32::from_le_bytes([contents[6], contents[7], contents[8], contents[9]]);
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&contents[10..HEADER_LEN]);
        let body_len = u64::from_le_bytes(len_buf) as usize;

        let body = contents
            .get(HEADER_LEN..HEADER_LEN.saturating_add(body_len))
            .filter(|body| body.len() == body_len)
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "Pool image truncated: expected {} body bytes, got {}",
                    body_len,
                    contents.len() - HEADER_LEN
                ))
            })?;

        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            return Err(Error::Corruption(format!(
                "Pool image CRC mismatch: expected {}, got {}",
                expected_crc, actual_crc
            )));
        }

        bincode::deserialize(body)
            .map_err(|e| Error::Corruption(format!("Failed to decode pool image: {}", e)))
    }

    /// Encode the image with its header
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body =
            bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&magic::POOL.to_le_bytes());
        out.extend_from_slice(&POOL_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);

        Ok(out)
    }

    /// Atomically replace the image at `path`
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let encoded = self.encode()?;
        let tmp_path = path.with_extension("tmp");

        {
            let mut file = File::create(&tmp_path).map_err(|e| {
                Error::Storage(format!("Failed to create {:?}: {}", tmp_path, e))
            })?;
            file.write_all(&encoded)
                .map_err(|e| Error::Storage(format!("Failed to write pool image: {}", e)))?;
            file.sync_all()
                .map_err(|e| Error::Storage(format!("Failed to sync pool image: {}", e)))?;
        }

        fs::rename(&tmp_path, path)
            .map_err(|e| Error::Storage(format!("Failed to install pool image: {}", e)))?;

        // Make the rename itself durable
        if let Some(dir) = path.parent() {
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}
