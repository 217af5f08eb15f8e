use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a fixed-size page within one backing file.
///
/// Page 0 of every backing file is reserved for file-level metadata, so the
/// zero id doubles as the "no page" sentinel in on-disk pointers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PageId(u64);

impl PageId {
    /// The null page id. Represents "no page".
    pub const NULL: PageId = PageId(0);

    /// Create a page id from its raw index.
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns `true` if this is the null page id.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw page index.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Byte offset of this page in a file made of `page_size`-byte pages.
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl From<PageId> for u64 {
    fn from(id: PageId) -> Self {
        id.0
    }
}
