//! Page store for the sdb save-file store.
//!
//! A store lives in two backing files: an index file of fixed-size pages
//! holding the header and B-tree nodes, and a blob file holding chained pages
//! for values too large to keep inline. This crate owns both files.
//!
//! # Key Types
//!
//! - [`Pager`] -- Both files of one open store plus the committed [`Header`]
//! - [`PageFile`] -- Page allocation, free list, and buffered I/O for one file
//! - [`BlobRef`] -- Location and length of a value body in the blob file
//! - [`StoreLayout`] -- Page sizes and tree geometry fixed at creation
//!
//! # Durability Rules
//!
//! 1. A page reachable from the committed header is never overwritten.
//! 2. Pages freed by a transaction become reusable only after it commits.
//! 3. Page data is flushed before the header that references it.
//! 4. The header alternates between two slots; the newest valid slot wins.
//! 5. Every open handle holds exclusive OS locks on both files.

pub mod blob;
pub mod error;
pub mod frame;
pub mod header;
pub mod lock;
pub mod page_file;
pub mod pager;

pub use blob::{BlobFileHeader, BlobRef};
pub use error::{PagerError, PagerResult};
pub use header::{Header, StoreLayout, HEADER_SLOT_SIZE};
pub use page_file::{FileState, PageFile, SyncMode};
pub use pager::Pager;
