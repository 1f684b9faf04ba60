//! On-disk format constants.
//!
//! A pool image opens with a magic number and a format version; the tree
//! backend tags its meta slot with its own magic so a pool written by a
//! different backend is refused instead of misread.

/// Version written into new pool images
pub const POOL_FORMAT_VERSION: u16 = 1;

/// Pool image versions this release can open
pub const POOL_VERSIONS: VersionRange = VersionRange {
    oldest: 1,
    newest: POOL_FORMAT_VERSION,
};

/// Magic numbers
pub mod magic {
    /// Pool image header: "PKVP"
    pub const POOL: u32 = 0x504B_5650;

    /// Tree meta slot: "PKVT"
    pub const TREE: u32 = 0x504B_5654;
}

/// Inclusive range of readable format versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Oldest version still readable
    pub oldest: u16,
    /// Newest version known to this release
    pub newest: u16,
}

impl VersionRange {
    /// Returns true if `version` can be opened
    pub fn contains(&self, version: u16) -> bool {
        (self.oldest..=self.newest).contains(&version)
    }
}
