// Tree node and meta slot encoding
//
// Nodes and the meta slot are bincode-encoded. The `*View` types decode the
// same bytes while borrowing keys and inline values from the slot, so lookups
// that only need keys never copy a value. Their variants must stay in the
// same order as the owned types.

use poolkv_core::format_version::magic;
use poolkv_core::{ByteSeq, Error, Result};
use poolkv_heap::Addr;
use serde::{Deserialize, Serialize};

/// Where an entry's value lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Value {
    /// Stored in the leaf itself
    Inline(ByteSeq),
    /// Stored in its own heap slot
    Blob { addr: Addr, len: u64 },
    /// Split over several slots; `index` holds their addresses in order
    Chunked { index: Addr, len: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Leaf {
    pub(crate) entries: Vec<(ByteSeq, Value)>,
}

impl Leaf {
    /// Position of `key`, or where it would be inserted
    pub(crate) fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|(entry, _)| entry.as_bytes().cmp(key))
    }
}

/// Interior node: `children[i]` holds keys in `[keys[i-1], keys[i])`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Branch {
    pub(crate) keys: Vec<ByteSeq>,
    pub(crate) children: Vec<Addr>,
}

impl Branch {
    /// Index of the child whose subtree would hold `key`
    pub(crate) fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| sep.as_bytes() <= key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf(Leaf),
    Branch(Branch),
}

impl Node {
    /// Entries in a leaf, separators in a branch
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Branch(branch) => branch.keys.len(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::Corruption(format!("Bad tree node: {}", e)))
    }
}

/// Borrowed form of [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) enum ValueView<'a> {
    Inline(&'a [u8]),
    Blob { addr: Addr, len: u64 },
    Chunked { index: Addr, len: u64 },
}

impl ValueView<'_> {
    /// The value bytes when they sit in the leaf
    pub(crate) fn inline(&self) -> Option<&[u8]> {
        match self {
            ValueView::Inline(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeafView<'a> {
    #[serde(borrow)]
    pub(crate) entries: Vec<(&'a [u8], ValueView<'a>)>,
}

impl LeafView<'_> {
    pub(crate) fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(entry, _)| (*entry).cmp(key))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchView<'a> {
    #[serde(borrow)]
    pub(crate) keys: Vec<&'a [u8]>,
    pub(crate) children: Vec<Addr>,
}

impl BranchView<'_> {
    pub(crate) fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| *sep <= key)
    }
}

/// Borrowed form of [`Node`]
#[derive(Debug, Deserialize)]
pub(crate) enum NodeView<'a> {
    #[serde(borrow)]
    Leaf(LeafView<'a>),
    #[serde(borrow)]
    Branch(BranchView<'a>),
}

impl<'a> NodeView<'a> {
    pub(crate) fn decode(data: &'a [u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::Corruption(format!("Bad tree node: {}", e)))
    }
}

/// Tree bookkeeping kept in the heap root slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TreeMeta {
    pub(crate) root: Addr,
    pub(crate) count: u64,
    pub(crate) height: u32,
}

#[derive(Serialize, Deserialize)]
struct MetaSlot {
    magic: u32,
    height: u32,
    root: Addr,
    count: u64,
}

impl TreeMeta {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let slot = MetaSlot {
            magic: magic::TREE,
            height: self.height,
            root: self.root,
            count: self.count,
        };
        bincode::serialize(&slot).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        let slot: MetaSlot = bincode::deserialize(data)
            .map_err(|e| Error::Pool(format!("Pool root is not a tree: {}", e)))?;
        if slot.magic != magic::TREE {
            return Err(Error::Pool(format!(
                "Pool root is not a tree (magic {:#010x})",
                slot.magic
            )));
        }
        Ok(Self {
            root: slot.root,
            count: slot.count,
            height: slot.height,
        })
    }
}

/// Chunk addresses of a [`Value::Chunked`] value
pub(crate) fn encode_chunk_index(chunks: &[Addr]) -> Result<Vec<u8>> {
    bincode::serialize(chunks).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode_chunk_index(data: &[u8]) -> Result<Vec<Addr>> {
    bincode::deserialize(data)
        .map_err(|e| Error::Corruption(format!("Bad value chunk index: {}", e)))
}
