//! The store header and its two alternating slots.
//!
//! Page 0 of the index file holds two header slots, at offsets `0` and
//! [`HEADER_SLOT_SIZE`]. Each commit writes the next generation into the slot
//! not holding the current header, so a torn header write leaves the previous
//! one readable. On open the valid slot with the highest generation wins.

use serde::{Deserialize, Serialize};
use tracing::warn;

use sdb_types::PageId;

use crate::error::{PagerError, PagerResult};
use crate::frame::{decode_framed, encode_framed};
use crate::page_file::FileState;

/// Magic bytes identifying an index file.
pub const INDEX_MAGIC: [u8; 8] = *b"SDBINDX1";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size reserved for one header slot.
pub const HEADER_SLOT_SIZE: usize = 512;

/// Smallest index page size: page 0 must hold both header slots.
pub const MIN_INDEX_PAGE_SIZE: usize = 2 * HEADER_SLOT_SIZE;

/// Smallest blob page size.
pub const MIN_BLOB_PAGE_SIZE: usize = 512;

/// Largest page size for either file.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Geometry fixed when a store is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLayout {
    /// Index page size in bytes.
    pub page_size: u32,
    /// Blob page size in bytes.
    pub blob_page_size: u32,
    /// Maximum keys per B-tree node.
    pub order: u32,
    /// Largest encoded value stored inline in a leaf.
    pub inline_limit: u32,
}

impl StoreLayout {
    /// Check that both page sizes are powers of two within bounds.
    pub fn validate(&self) -> PagerResult<()> {
        check_page_size("page_size", self.page_size, MIN_INDEX_PAGE_SIZE)?;
        check_page_size("blob_page_size", self.blob_page_size, MIN_BLOB_PAGE_SIZE)?;
        Ok(())
    }
}

fn check_page_size(field: &str, size: u32, min: usize) -> PagerResult<()> {
    let size = size as usize;
    if !size.is_power_of_two() || size < min || size > MAX_PAGE_SIZE {
        return Err(PagerError::InvalidLayout(format!(
            "{field} must be a power of two between {min} and {MAX_PAGE_SIZE}, got {size}"
        )));
    }
    Ok(())
}

/// The committed root of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    /// Incremented by every commit.
    pub generation: u64,
    pub layout: StoreLayout,
    /// Root node of the tree; null when the store is empty.
    pub root: PageId,
    /// Number of keys in the tree.
    pub entry_count: u64,
    /// Allocation state of the index file.
    pub index: FileState,
    /// Allocation state of the blob file.
    pub blobs: FileState,
}

impl Header {
    /// Header of a freshly created, empty store.
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            magic: INDEX_MAGIC,
            version: FORMAT_VERSION,
            generation: 1,
            layout,
            root: PageId::NULL,
            entry_count: 0,
            index: FileState::empty(),
            blobs: FileState::empty(),
        }
    }

    /// Encode into one framed slot.
    pub fn encode(&self) -> PagerResult<Vec<u8>> {
        encode_framed(self, HEADER_SLOT_SIZE)
    }

    /// Decode and validate one slot.
    pub fn decode(slot: &[u8]) -> PagerResult<Self> {
        let header: Header = decode_framed(slot)?;
        if header.magic != INDEX_MAGIC {
            return Err(PagerError::Corrupt("bad index magic".into()));
        }
        if header.version != FORMAT_VERSION {
            return Err(PagerError::Corrupt(format!(
                "unsupported format version {}",
                header.version
            )));
        }
        header.layout.validate()?;
        Ok(header)
    }

    /// Pick the newest valid header out of the two slots in `page0`.
    ///
    /// Returns the header and the slot it came from.
    pub fn select(page0: &[u8]) -> PagerResult<(Self, usize)> {
        let mut best: Option<(Self, usize)> = None;
        for slot in 0..2 {
            let start = slot * HEADER_SLOT_SIZE;
            let Some(bytes) = page0.get(start..start + HEADER_SLOT_SIZE) else {
                continue;
            };
            match Self::decode(bytes) {
                Ok(header) => {
                    if best.map_or(true, |(b, _)| header.generation > b.generation) {
                        best = Some((header, slot));
                    }
                }
                // The unused slot of a new store is all zeroes.
                Err(_) if bytes.iter().all(|b| *b == 0) => {}
                Err(e) => warn!(slot, error = %e, "ignoring invalid header slot"),
            }
        }
        best.ok_or_else(|| PagerError::Corrupt("no valid header slot".into()))
    }
}

/// Byte offset of a header slot within page 0.
pub fn slot_offset(slot: usize) -> u64 {
    (slot * HEADER_SLOT_SIZE) as u64
}
