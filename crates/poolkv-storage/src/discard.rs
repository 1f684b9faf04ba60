//! Discard backend: accepts every write and stores nothing.
//!
//! Useful as a floor when measuring the cost of everything except storage.

use crate::backend::{Backend, EntryVisitor, KeyVisitor};
use crate::scan::{KeyRange, Scan};
use poolkv_core::{ByteSeq, Config, Result};

/// Backend that drops every write and never finds anything
#[derive(Debug, Default)]
pub struct DiscardBackend;

impl DiscardBackend {
    /// Registry name
    pub const NAME: &'static str = "discard";

    /// Create the backend. The configuration is validated but no file is
    /// touched.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        tracing::debug!("opened discard backend");
        Ok(Self)
    }
}

impl Backend for DiscardBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn put(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn get(&self, _key: &[u8]) -> Result<Option<ByteSeq>> {
        Ok(None)
    }

    fn exists(&self, _key: &[u8]) -> Result<bool> {
        Ok(false)
    }

    fn remove(&self, _key: &[u8]) -> Result<bool> {
        Ok(false)
    }

    fn count(&self) -> Result<u64> {
        Ok(0)
    }

    fn count_range(&self, _range: &KeyRange) -> Result<u64> {
        Ok(0)
    }

    fn each(&self, _scan: &Scan, _visitor: &mut EntryVisitor<'_>) -> Result<()> {
        Ok(())
    }

    fn all(&self, _scan: &Scan, _visitor: &mut KeyVisitor<'_>) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
