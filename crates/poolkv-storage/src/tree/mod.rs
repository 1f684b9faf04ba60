//! Persistent B+ tree backend.
//!
//! Nodes live in heap slots. The heap root points at a small meta slot
//! holding the tree root, height and entry count, so `count()` is a single
//! slot read. Values up to [`INLINE_VALUE_MAX`] bytes are stored in the
//! leaf; larger values get a slot of their own, or a chunk index plus
//! [`VALUE_CHUNK`]-sized slots past that size. Lookups decode leaves in
//! place, so `exists` and key-only traversal never copy or load a value.
//!
//! Every mutation (including node splits, merges, redistribution and root
//! collapse) is staged in one [`HeapTx`] and committed atomically, so a
//! crash never exposes a half-restructured tree.
//!
//! ## Concurrency
//!
//! Lookups share a read lock; mutations take the write lock for the
//! duration of their heap transaction. Traversal takes one leaf at a time
//! under the read lock and releases it before invoking the visitor, then
//! re-seeks from the last leaf's upper fence. Entries visited were present
//! when their leaf was read; entries inserted or removed in leaves not
//! yet reached may or may not be seen.

mod node;

use crate::backend::{Backend, EntryVisitor, KeyVisitor, Visit};
use crate::scan::Scan;
use node::{
    decode_chunk_index, encode_chunk_index, Branch, Leaf, LeafView, Node, NodeView, TreeMeta,
    Value, ValueView,
};
use poolkv_core::{validate_key, ByteSeq, Config, Error, Result};
use poolkv_heap::{Addr, Heap, HeapStats, HeapTx, NULL_ADDR};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

/// Largest number of entries in a leaf or separators in a branch
pub const MAX_KEYS: usize = 32;

/// Smallest occupancy of a non-root node
pub const MIN_KEYS: usize = MAX_KEYS / 2;

/// Values longer than this are stored out of line
pub const INLINE_VALUE_MAX: usize = 64;

/// Out-of-line values longer than this are split into slots of this size
pub const VALUE_CHUNK: usize = 1024 * 1024;

/// Separator and address of the right half produced by a split
type Split = (ByteSeq, Addr);

/// B+ tree over a transactional heap
pub struct TreeBackend {
    heap: Heap,
    /// Readers share, writers exclude each other and readers
    lock: RwLock<()>,
}

impl TreeBackend {
    /// Registry name
    pub const NAME: &'static str = "tree";

    /// Open or create the tree stored in the pool at `config.path`
    pub fn open(config: &Config) -> Result<Self> {
        let heap = Heap::open(config)?;

        if heap.root()? == NULL_ADDR {
            let mut tx = heap.begin();
            let root = tx.allocate(Node::Leaf(Leaf::default()).encode()?);
            let meta = TreeMeta {
                root,
                count: 0,
                height: 1,
            };
            let meta_addr = tx.allocate(meta.encode()?);
            tx.set_root(meta_addr);
            tx.commit()?;
            tracing::info!(path = %config.path.display(), "created tree");
        }

        let backend = Self {
            heap,
            lock: RwLock::new(()),
        };
        let meta = backend.meta()?;
        tracing::debug!(count = meta.count, height = meta.height, "opened tree");

        Ok(backend)
    }

    /// Heap usage of the underlying pool
    pub fn heap_stats(&self) -> Result<HeapStats> {
        self.heap.stats()
    }

    /// Number of levels, 1 for a single leaf
    pub fn height(&self) -> Result<u32> {
        let _guard = self.lock.read().map_err(|_| Error::LockPoisoned)?;
        Ok(self.meta()?.height)
    }

    fn meta(&self) -> Result<TreeMeta> {
        let addr = self.heap.root()?;
        let data = self
            .heap
            .read(addr)?
            .ok_or_else(|| Error::Corruption(format!("Tree meta slot {} missing", addr)))?;
        TreeMeta::decode(&data)
    }

    fn read_slot(&self, addr: Addr, what: &str) -> Result<Arc<[u8]>> {
        self.heap
            .read(addr)?
            .ok_or_else(|| Error::Corruption(format!("{} slot {} missing", what, addr)))
    }

    /// Slot of the leaf whose key range holds `key`
    fn find_leaf(&self, key: &[u8]) -> Result<Arc<[u8]>> {
        self.seek(Bound::Included(key)).map(|(slot, _)| slot)
    }

    /// Slot of the first leaf that may hold keys after `lower`, with its
    /// upper fence.
    ///
    /// Every key in the returned leaf is below the fence; `None` means the
    /// leaf is the last one.
    fn seek(&self, lower: Bound<&[u8]>) -> Result<(Arc<[u8]>, Option<ByteSeq>)> {
        let mut addr = self.meta()?.root;
        let mut fence = None;
        loop {
            let slot = self.read_slot(addr, "Tree node")?;
            let next = match NodeView::decode(&slot)? {
                NodeView::Leaf(_) => None,
                NodeView::Branch(branch) => {
                    let idx = match lower {
                        Bound::Unbounded => 0,
                        Bound::Included(key) | Bound::Excluded(key) => branch.child_index(key),
                    };
                    if idx < branch.keys.len() {
                        fence = Some(ByteSeq::copy_from(branch.keys[idx]));
                    }
                    Some(branch.children[idx])
                }
            };
            match next {
                Some(child) => addr = child,
                None => return Ok((slot, fence)),
            }
        }
    }

    fn load_value(&self, value: &ValueView<'_>) -> Result<ByteSeq> {
        match *value {
            ValueView::Inline(bytes) => Ok(ByteSeq::copy_from(bytes)),
            ValueView::Blob { addr, .. } => self.read_slot(addr, "Value").map(ByteSeq::from),
            ValueView::Chunked { index, len } => {
                let chunks = decode_chunk_index(&self.read_slot(index, "Value")?)?;
                let mut bytes = Vec::with_capacity(chunks.len() * VALUE_CHUNK);
                for addr in chunks {
                    bytes.extend_from_slice(&self.read_slot(addr, "Value chunk")?);
                }
                if bytes.len() as u64 != len {
                    return Err(Error::Corruption(format!(
                        "Chunked value is {} bytes, expected {}",
                        bytes.len(),
                        len
                    )));
                }
                Ok(ByteSeq::from(bytes))
            }
        }
    }

    /// Walk admitted entries leaf by leaf without holding the lock across
    /// visitor calls
    fn traverse(
        &self,
        scan: &Scan,
        with_values: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> Visit,
    ) -> Result<()> {
        let range = scan.key_range();
        if range.is_empty() {
            return Ok(());
        }

        let mut resume: Option<ByteSeq> = None;
        loop {
            // Positions of admitted entries, with out-of-line values loaded
            // while their slots are guaranteed live
            let (slot, admitted, fence) = {
                let _guard = self.lock.read().map_err(|_| Error::LockPoisoned)?;
                let lower = match resume.as_deref() {
                    Some(fence) => Bound::Included(fence),
                    None => range.lower_bound(),
                };
                let (slot, fence) = self.seek(lower)?;

                let admitted = {
                    let leaf = leaf_view(&slot)?;
                    let mut admitted = Vec::new();
                    for (pos, (key, value)) in leaf.entries.iter().enumerate() {
                        let after_lower = match lower {
                            Bound::Included(lo) => *key >= lo,
                            Bound::Excluded(lo) => *key > lo,
                            Bound::Unbounded => true,
                        };
                        if !after_lower || !scan.admits(key) {
                            continue;
                        }
                        let loaded = match value {
                            ValueView::Inline(_) => None,
                            _ if with_values => Some(self.load_value(value)?),
                            _ => None,
                        };
                        admitted.push((pos, loaded));
                    }
                    admitted
                };
                (slot, admitted, fence)
            };

            let leaf = leaf_view(&slot)?;
            for (pos, loaded) in &admitted {
                let (key, value) = &leaf.entries[*pos];
                let value = loaded.as_deref().or_else(|| value.inline()).unwrap_or(&[][..]);
                if f(*key, value) == Visit::Stop {
                    return Ok(());
                }
            }

            match fence {
                Some(fence) if !range.is_past_end(&fence) => resume = Some(fence),
                _ => return Ok(()),
            }
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) -> Result<()> {
        let meta = self.meta()?;
        let mut count = 0u64;
        let depth = self.check_node(meta.root, None, None, true, &mut count)?;
        assert_eq!(depth, meta.height, "height mismatch");
        assert_eq!(count, meta.count, "count mismatch");
        Ok(())
    }

    /// Returns the subtree depth
    #[cfg(test)]
    fn check_node(
        &self,
        addr: Addr,
        lo: Option<&ByteSeq>,
        hi: Option<&ByteSeq>,
        is_root: bool,
        count: &mut u64,
    ) -> Result<u32> {
        let node = Node::decode(&self.read_slot(addr, "Tree node")?)?;
        if !is_root {
            assert!(node.len() >= MIN_KEYS, "underfull node {}", addr);
        }
        assert!(node.len() <= MAX_KEYS, "overfull node {}", addr);

        let in_bounds =
            |key: &ByteSeq| lo.map_or(true, |lo| key >= lo) && hi.map_or(true, |hi| key < hi);

        match node {
            Node::Leaf(leaf) => {
                assert!(leaf.entries.windows(2).all(|w| w[0].0 < w[1].0));
                assert!(leaf.entries.iter().all(|(k, _)| in_bounds(k)));
                *count += leaf.entries.len() as u64;
                Ok(1)
            }
            Node::Branch(branch) => {
                assert_eq!(branch.children.len(), branch.keys.len() + 1);
                assert!(branch.keys.windows(2).all(|w| w[0] < w[1]));
                let mut depth = None;
                for (i, child) in branch.children.iter().enumerate() {
                    let child_lo = if i == 0 { lo } else { Some(&branch.keys[i - 1]) };
                    let child_hi = branch.keys.get(i).or(hi);
                    let d = self.check_node(*child, child_lo, child_hi, false, count)?;
                    assert!(depth.map_or(true, |depth| depth == d), "unbalanced");
                    depth = Some(d);
                }
                Ok(depth.unwrap_or(0) + 1)
            }
        }
    }
}

fn leaf_view(slot: &[u8]) -> Result<LeafView<'_>> {
    match NodeView::decode(slot)? {
        NodeView::Leaf(leaf) => Ok(leaf),
        NodeView::Branch(_) => Err(Error::Corruption("Tree seek ended on a branch".to_string())),
    }
}

fn tx_load(tx: &HeapTx<'_>, addr: Addr) -> Result<Node> {
    let data = tx
        .read(addr)?
        .ok_or_else(|| Error::Corruption(format!("Tree node {} missing", addr)))?;
    Node::decode(&data)
}

fn tx_store(tx: &mut HeapTx<'_>, addr: Addr, node: &Node) -> Result<()> {
    tx.write(addr, node.encode()?)
}

fn tx_meta(tx: &HeapTx<'_>) -> Result<(Addr, TreeMeta)> {
    let addr = tx.root()?;
    let data = tx
        .read(addr)?
        .ok_or_else(|| Error::Corruption(format!("Tree meta slot {} missing", addr)))?;
    Ok((addr, TreeMeta::decode(&data)?))
}

/// Stage `value` inline, in one slot, or split into [`VALUE_CHUNK`] slots
fn store_value(tx: &mut HeapTx<'_>, value: &[u8]) -> Result<Value> {
    let len = value.len() as u64;
    if value.len() <= INLINE_VALUE_MAX {
        return Ok(Value::Inline(ByteSeq::copy_from(value)));
    }
    if value.len() <= VALUE_CHUNK {
        return Ok(Value::Blob {
            addr: tx.allocate(value.to_vec()),
            len,
        });
    }

    let chunks: Vec<Addr> = value
        .chunks(VALUE_CHUNK)
        .map(|chunk| tx.allocate(chunk.to_vec()))
        .collect();
    let index = tx.allocate(encode_chunk_index(&chunks)?);
    Ok(Value::Chunked { index, len })
}

/// Free every slot an out-of-line value occupies
fn free_value(tx: &mut HeapTx<'_>, value: &Value) -> Result<()> {
    match *value {
        Value::Inline(_) => Ok(()),
        Value::Blob { addr, .. } => tx.free(addr),
        Value::Chunked { index, .. } => {
            let data = tx
                .read(index)?
                .ok_or_else(|| Error::Corruption(format!("Value slot {} missing", index)))?;
            for addr in decode_chunk_index(&data)? {
                tx.free(addr)?;
            }
            tx.free(index)
        }
    }
}

/// Insert below `addr`; returns the replaced value and a split of `addr`
fn insert(
    tx: &mut HeapTx<'_>,
    addr: Addr,
    key: &[u8],
    value: Value,
) -> Result<(Option<Value>, Option<Split>)> {
    match tx_load(tx, addr)? {
        Node::Leaf(mut leaf) => {
            let old = match leaf.search(key) {
                Ok(pos) => Some(std::mem::replace(&mut leaf.entries[pos].1, value)),
                Err(pos) => {
                    leaf.entries.insert(pos, (ByteSeq::copy_from(key), value));
                    None
                }
            };

            if leaf.entries.len() <= MAX_KEYS {
                tx_store(tx, addr, &Node::Leaf(leaf))?;
                return Ok((old, None));
            }

            let right = Leaf {
                entries: leaf.entries.split_off(leaf.entries.len() / 2),
            };
            let separator = right.entries[0].0.clone();
            let right_addr = tx.allocate(Node::Leaf(right).encode()?);
            tx_store(tx, addr, &Node::Leaf(leaf))?;
            Ok((old, Some((separator, right_addr))))
        }
        Node::Branch(mut branch) => {
            let idx = branch.child_index(key);
            let (old, split) = insert(tx, branch.children[idx], key, value)?;

            let Some((separator, right_addr)) = split else {
                return Ok((old, None));
            };
            branch.keys.insert(idx, separator);
            branch.children.insert(idx + 1, right_addr);

            if branch.keys.len() <= MAX_KEYS {
                tx_store(tx, addr, &Node::Branch(branch))?;
                return Ok((old, None));
            }

            let mid = branch.keys.len() / 2;
            let right_keys = branch.keys.split_off(mid + 1);
            let right_children = branch.children.split_off(mid + 1);
            let separator = branch
                .keys
                .pop()
                .ok_or_else(|| Error::Corruption("Empty branch during split".to_string()))?;
            let right = Branch {
                keys: right_keys,
                children: right_children,
            };
            let right_addr = tx.allocate(Node::Branch(right).encode()?);
            tx_store(tx, addr, &Node::Branch(branch))?;
            Ok((old, Some((separator, right_addr))))
        }
    }
}

/// Remove `key` below `addr`; returns the removed value and the node's
/// occupancy afterwards
fn remove(tx: &mut HeapTx<'_>, addr: Addr, key: &[u8]) -> Result<Option<(Value, usize)>> {
    match tx_load(tx, addr)? {
        Node::Leaf(mut leaf) => match leaf.search(key) {
            Ok(pos) => {
                let (_, value) = leaf.entries.remove(pos);
                let len = leaf.entries.len();
                tx_store(tx, addr, &Node::Leaf(leaf))?;
                Ok(Some((value, len)))
            }
            Err(_) => Ok(None),
        },
        Node::Branch(mut branch) => {
            let idx = branch.child_index(key);
            let Some((value, child_len)) = remove(tx, branch.children[idx], key)? else {
                return Ok(None);
            };

            if child_len >= MIN_KEYS {
                return Ok(Some((value, branch.keys.len())));
            }

            rebalance(tx, &mut branch, idx)?;
            let len = branch.keys.len();
            tx_store(tx, addr, &Node::Branch(branch))?;
            Ok(Some((value, len)))
        }
    }
}

/// Fix the underfull child `idx` of `parent` by merging it with a sibling
/// or redistributing their contents
fn rebalance(tx: &mut HeapTx<'_>, parent: &mut Branch, idx: usize) -> Result<()> {
    let left_idx = if idx > 0 { idx - 1 } else { idx };
    let right_idx = left_idx + 1;
    let (left_addr, right_addr) = (parent.children[left_idx], parent.children[right_idx]);

    match (tx_load(tx, left_addr)?, tx_load(tx, right_addr)?) {
        (Node::Leaf(mut left), Node::Leaf(right)) => {
            left.entries.extend(right.entries);
            if left.entries.len() <= MAX_KEYS {
                tx_store(tx, left_addr, &Node::Leaf(left))?;
                tx.free(right_addr)?;
                parent.keys.remove(left_idx);
                parent.children.remove(right_idx);
            } else {
                let right = Leaf {
                    entries: left.entries.split_off(left.entries.len() / 2),
                };
                parent.keys[left_idx] = right.entries[0].0.clone();
                tx_store(tx, left_addr, &Node::Leaf(left))?;
                tx_store(tx, right_addr, &Node::Leaf(right))?;
            }
        }
        (Node::Branch(mut left), Node::Branch(right)) => {
            left.keys.push(parent.keys[left_idx].clone());
            left.keys.extend(right.keys);
            left.children.extend(right.children);
            if left.keys.len() <= MAX_KEYS {
                tx_store(tx, left_addr, &Node::Branch(left))?;
                tx.free(right_addr)?;
                parent.keys.remove(left_idx);
                parent.children.remove(right_idx);
            } else {
                let mid = left.keys.len() / 2;
                let right_keys = left.keys.split_off(mid + 1);
                let right_children = left.children.split_off(mid + 1);
                let separator = left
                    .keys
                    .pop()
                    .ok_or_else(|| Error::Corruption("Empty branch during rebalance".to_string()))?;
                parent.keys[left_idx] = separator;
                let right = Branch {
                    keys: right_keys,
                    children: right_children,
                };
                tx_store(tx, left_addr, &Node::Branch(left))?;
                tx_store(tx, right_addr, &Node::Branch(right))?;
            }
        }
        _ => {
            return Err(Error::Corruption(
                "Sibling tree nodes at different levels".to_string(),
            ))
        }
    }

    Ok(())
}

impl Backend for TreeBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let _guard = self.lock.write().map_err(|_| Error::LockPoisoned)?;

        let mut tx = self.heap.begin();
        let (meta_addr, mut meta) = tx_meta(&tx)?;

        let stored = store_value(&mut tx, value)?;

        let (old, split) = insert(&mut tx, meta.root, key, stored)?;
        let mut meta_dirty = false;

        if let Some((separator, right_addr)) = split {
            let new_root = Branch {
                keys: vec![separator],
                children: vec![meta.root, right_addr],
            };
            meta.root = tx.allocate(Node::Branch(new_root).encode()?);
            meta.height += 1;
            meta_dirty = true;
        }

        match old {
            Some(old) => free_value(&mut tx, &old)?,
            None => {
                meta.count += 1;
                meta_dirty = true;
            }
        }

        if meta_dirty {
            tx.write(meta_addr, meta.encode()?)?;
        }
        tx.commit()
    }

    fn get(&self, key: &[u8]) -> Result<Option<ByteSeq>> {
        let _guard = self.lock.read().map_err(|_| Error::LockPoisoned)?;
        let slot = self.find_leaf(key)?;
        let leaf = leaf_view(&slot)?;
        match leaf.search(key) {
            Ok(pos) => self.load_value(&leaf.entries[pos].1).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.lock.read().map_err(|_| Error::LockPoisoned)?;
        let slot = self.find_leaf(key)?;
        let found = leaf_view(&slot)?.search(key).is_ok();
        Ok(found)
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.lock.write().map_err(|_| Error::LockPoisoned)?;

        let mut tx = self.heap.begin();
        let (meta_addr, mut meta) = tx_meta(&tx)?;

        let Some((value, _)) = remove(&mut tx, meta.root, key)? else {
            return Ok(false);
        };

        free_value(&mut tx, &value)?;
        meta.count -= 1;

        // Collapse a root branch left with a single child
        if let Node::Branch(root) = tx_load(&tx, meta.root)? {
            if root.keys.is_empty() {
                tx.free(meta.root)?;
                meta.root = root.children[0];
                meta.height -= 1;
            }
        }

        tx.write(meta_addr, meta.encode()?)?;
        tx.commit()?;
        Ok(true)
    }

    fn count(&self) -> Result<u64> {
        let _guard = self.lock.read().map_err(|_| Error::LockPoisoned)?;
        Ok(self.meta()?.count)
    }

    fn each(&self, scan: &Scan, visitor: &mut EntryVisitor<'_>) -> Result<()> {
        self.traverse(scan, true, |key, value| visitor(key, value))
    }

    fn all(&self, scan: &Scan, visitor: &mut KeyVisitor<'_>) -> Result<()> {
        self.traverse(scan, false, |key, _| visitor(key))
    }

    fn flush(&self) -> Result<()> {
        let _guard = self.lock.write().map_err(|_| Error::LockPoisoned)?;
        self.heap.checkpoint()
    }

    fn close(&self) -> Result<()> {
        let _guard = self.lock.write().map_err(|_| Error::LockPoisoned)?;
        self.heap.close()
    }
}
