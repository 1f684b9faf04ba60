//! Volatile sorted map backend.
//!
//! An in-memory `BTreeMap` with the same contract as the persistent
//! backends, minus durability: contents are lost on close. When the
//! configuration carries a `size`, the key and value bytes held are
//! limited to it.

use crate::backend::{Backend, EntryVisitor, KeyVisitor, Visit};
use crate::scan::{KeyRange, Scan};
use poolkv_core::{validate_key, ByteSeq, Config, Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

/// Entries copied out per lock acquisition during traversal
const SCAN_BATCH: usize = 64;

/// Sorted map plus its byte accounting
#[derive(Debug, Default)]
struct SortedMap {
    data: BTreeMap<ByteSeq, ByteSeq>,
    size_bytes: u64,
}

impl SortedMap {
    fn entry_size(key: &[u8], value: &[u8]) -> u64 {
        (key.len() + value.len()) as u64
    }

    /// Bytes held after replacing `key`'s value with one of `value_len` bytes
    fn projected_size(&self, key: &[u8], value_len: usize) -> u64 {
        let old = self
            .data
            .get(key)
            .map_or(0, |old| Self::entry_size(key, old));
        (self.size_bytes + (key.len() + value_len) as u64).saturating_sub(old)
    }

    fn put(&mut self, key: ByteSeq, value: ByteSeq) {
        self.size_bytes += Self::entry_size(&key, &value);
        if let Some(old) = self.data.get(key.as_bytes()) {
            self.size_bytes -= Self::entry_size(&key, old);
        }
        self.data.insert(key, value);
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        match self.data.remove_entry(key) {
            Some((key, value)) => {
                self.size_bytes -= Self::entry_size(&key, &value);
                true
            }
            None => false,
        }
    }

    /// Copy up to `limit` entries after `lower` that the scan admits
    fn batch(
        &self,
        lower: Bound<&[u8]>,
        scan: &Scan,
        limit: usize,
    ) -> (Vec<(ByteSeq, ByteSeq)>, Option<ByteSeq>) {
        let mut batch = Vec::new();
        let mut last = None;
        let range = scan.key_range();

        for (key, value) in self
            .data
            .range::<[u8], _>((lower, range.upper_bound()))
        {
            last = Some(key.clone());
            if scan.admits(key) {
                batch.push((key.clone(), value.clone()));
                if batch.len() == limit {
                    break;
                }
            }
        }

        (batch, last)
    }
}

/// Volatile ordered-map backend
#[derive(Debug)]
pub struct VsMapBackend {
    map: RwLock<SortedMap>,
    capacity: Option<u64>,
}

impl VsMapBackend {
    /// Registry name
    pub const NAME: &'static str = "vsmap";

    /// Create an empty map limited to `config.size` bytes, if set
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        tracing::debug!(capacity = ?config.size, "opened volatile map backend");
        Ok(Self {
            map: RwLock::new(SortedMap::default()),
            capacity: config.size,
        })
    }

    /// Key and value bytes currently held
    pub fn size_bytes(&self) -> Result<u64> {
        Ok(self.map.read().map_err(|_| Error::LockPoisoned)?.size_bytes)
    }

    /// Drive `f` over admitted entries, one batch per lock acquisition
    fn scan_batches(
        &self,
        scan: &Scan,
        mut f: impl FnMut(&ByteSeq, &ByteSeq) -> Visit,
    ) -> Result<()> {
        let range = scan.key_range();
        if range.is_empty() {
            return Ok(());
        }

        let mut resume: Option<ByteSeq> = None;
        loop {
            let (batch, last) = {
                let map = self.map.read().map_err(|_| Error::LockPoisoned)?;
                let lower = match resume.as_deref() {
                    Some(key) => Bound::Excluded(key),
                    None => range.lower_bound(),
                };
                map.batch(lower, scan, SCAN_BATCH)
            };

            for (key, value) in &batch {
                if f(key, value) == Visit::Stop {
                    return Ok(());
                }
            }

            match last {
                Some(key) if batch.len() == SCAN_BATCH => resume = Some(key),
                _ => return Ok(()),
            }
        }
    }
}

impl Backend for VsMapBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut map = self.map.write().map_err(|_| Error::LockPoisoned)?;

        if let Some(capacity) = self.capacity {
            let projected = map.projected_size(key, value.len());
            if projected > capacity {
                return Err(Error::OutOfSpace {
                    requested: projected,
                    available: capacity,
                });
            }
        }

        map.put(ByteSeq::copy_from(key), ByteSeq::copy_from(value));
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<ByteSeq>> {
        let map = self.map.read().map_err(|_| Error::LockPoisoned)?;
        Ok(map.data.get(key).cloned())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let map = self.map.read().map_err(|_| Error::LockPoisoned)?;
        Ok(map.data.contains_key(key))
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        let mut map = self.map.write().map_err(|_| Error::LockPoisoned)?;
        Ok(map.remove(key))
    }

    fn count(&self) -> Result<u64> {
        let map = self.map.read().map_err(|_| Error::LockPoisoned)?;
        Ok(map.data.len() as u64)
    }

    fn count_range(&self, range: &KeyRange) -> Result<u64> {
        if range.is_empty() {
            return Ok(0);
        }
        let map = self.map.read().map_err(|_| Error::LockPoisoned)?;
        Ok(map
            .data
            .range::<[u8], _>((range.lower_bound(), range.upper_bound()))
            .count() as u64)
    }

    fn each(&self, scan: &Scan, visitor: &mut EntryVisitor<'_>) -> Result<()> {
        self.scan_batches(scan, |key, value| visitor(key.as_bytes(), value.as_bytes()))
    }

    fn all(&self, scan: &Scan, visitor: &mut KeyVisitor<'_>) -> Result<()> {
        self.scan_batches(scan, |key, _| visitor(key.as_bytes()))
    }

    fn close(&self) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Error::LockPoisoned)?;
        *map = SortedMap::default();
        Ok(())
    }
}
