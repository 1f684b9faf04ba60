// Scoped heap transaction
//
// Mutations are staged in memory; the committed heap is untouched until
// commit(). Reads inside the transaction see its own staged writes.

use crate::heap::Heap;
use crate::{Addr, NULL_ADDR};
use poolkv_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Staged changes of one transaction
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub(crate) stores: BTreeMap<Addr, Arc<[u8]>>,
    pub(crate) frees: BTreeSet<Addr>,
    pub(crate) root: Option<Addr>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.stores.is_empty() && self.frees.is_empty() && self.root.is_none()
    }
}

/// An atomic group of heap mutations.
///
/// Either every change becomes durable on [`HeapTx::commit`] or none does.
/// Dropping the transaction without committing discards it.
pub struct HeapTx<'h> {
    heap: &'h Heap,
    staged: Staged,
    /// Slots allocated by this transaction (not yet in the heap)
    allocated: HashSet<Addr>,
}

impl<'h> HeapTx<'h> {
    pub(crate) fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            staged: Staged::default(),
            allocated: HashSet::new(),
        }
    }

    /// Allocate a new slot holding `data`
    pub fn allocate(&mut self, data: Vec<u8>) -> Addr {
        let addr = self.heap.next_addr();
        self.allocated.insert(addr);
        self.staged.stores.insert(addr, Arc::from(data));
        addr
    }

    /// Replace the contents of a live slot
    pub fn write(&mut self, addr: Addr, data: Vec<u8>) -> Result<()> {
        if !self.is_live(addr)? {
            return Err(Error::Storage(format!("Write to unallocated slot {}", addr)));
        }
        self.staged.stores.insert(addr, Arc::from(data));
        Ok(())
    }

    /// Release a live slot
    pub fn free(&mut self, addr: Addr) -> Result<()> {
        if self.allocated.remove(&addr) {
            self.staged.stores.remove(&addr);
            return Ok(());
        }
        if !self.is_live(addr)? {
            return Err(Error::Storage(format!("Free of unallocated slot {}", addr)));
        }
        self.staged.stores.remove(&addr);
        self.staged.frees.insert(addr);
        Ok(())
    }

    /// Read a slot as this transaction sees it
    pub fn read(&self, addr: Addr) -> Result<Option<Arc<[u8]>>> {
        if let Some(data) = self.staged.stores.get(&addr) {
            return Ok(Some(Arc::clone(data)));
        }
        if self.staged.frees.contains(&addr) {
            return Ok(None);
        }
        self.heap.read(addr)
    }

    /// Point the root handle at `addr`
    pub fn set_root(&mut self, addr: Addr) {
        self.staged.root = Some(addr);
    }

    /// Root handle as this transaction sees it
    pub fn root(&self) -> Result<Addr> {
        match self.staged.root {
            Some(root) => Ok(root),
            None => self.heap.root(),
        }
    }

    /// Make every staged change durable and visible.
    ///
    /// Fails with `OutOfSpace` when the result would exceed the pool
    /// capacity; nothing is applied in that case.
    pub fn commit(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.allocated.clear();
        if staged.is_empty() {
            return self.heap.ensure_open();
        }
        self.heap.commit(staged)
    }

    fn is_live(&self, addr: Addr) -> Result<bool> {
        if addr == NULL_ADDR || self.staged.frees.contains(&addr) {
            return Ok(false);
        }
        if self.allocated.contains(&addr) {
            return Ok(true);
        }
        self.heap.contains(addr)
    }
}

impl Drop for HeapTx<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::trace!(
                stores = self.staged.stores.len(),
                frees = self.staged.frees.len(),
                "discarding uncommitted heap transaction"
            );
        }
    }
}
