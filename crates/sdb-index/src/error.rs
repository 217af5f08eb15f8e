//! Error types for the index crate.

use sdb_pager::PagerError;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The key is empty or longer than the maximum key length.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The key is not present in the tree.
    #[error("key not found")]
    KeyNotFound,

    /// Tree options cannot produce nodes that fit in a page.
    #[error("invalid index options: {0}")]
    InvalidOptions(String),

    /// The tree structure on disk is inconsistent.
    #[error("corrupt index: {0}")]
    Corrupt(String),

    /// Page store operation failed.
    #[error("page store error: {0}")]
    Pager(#[from] PagerError),
}

impl From<sdb_types::TypeError> for IndexError {
    fn from(e: sdb_types::TypeError) -> Self {
        match e {
            sdb_types::TypeError::InvalidKey(reason) => IndexError::InvalidKey(reason),
            other => IndexError::InvalidKey(other.to_string()),
        }
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
