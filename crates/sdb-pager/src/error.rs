use std::path::PathBuf;

use sdb_types::PageId;

/// Errors from page store operations.
#[derive(Debug, thiserror::Error)]
pub enum PagerError {
    /// I/O error from the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another handle holds the exclusive lock on a backing file.
    #[error("{} is locked by another handle", .0.display())]
    Locked(PathBuf),

    /// On-disk data failed validation (checksum, magic, bounds, chain shape).
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// A page id outside the allocated range was dereferenced.
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: PageId, page_count: u64 },

    /// Encoded data does not fit in one page.
    #[error("{len} bytes do not fit in a {page_size}-byte page")]
    PageOverflow { len: usize, page_size: usize },

    /// Attempted to overwrite a page reachable from the committed header.
    #[error("page {0} belongs to the committed state and cannot be overwritten")]
    CommittedPage(PageId),

    /// Page sizes requested at creation are unusable.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Serialization failure while encoding a page.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for page store operations.
pub type PagerResult<T> = Result<T, PagerError>;
