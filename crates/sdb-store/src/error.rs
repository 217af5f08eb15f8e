//! Error types for save files.

use std::io;
use std::path::PathBuf;

use sdb_codec::CodecError;
use sdb_index::IndexError;
use sdb_pager::PagerError;
use sdb_types::TypeError;

/// Errors returned by [`crate::SaveFile`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The operation needs an open handle.
    #[error("save file is not open")]
    NotOpen,

    /// `open`/`reopen` was called on a handle that is already open.
    #[error("save file {0:?} is already open")]
    AlreadyOpen(String),

    /// Another handle holds the lock on a backing file.
    #[error("{} is locked by another handle", .0.display())]
    AlreadyOpenElsewhere(PathBuf),

    /// The store directory does not exist.
    #[error("directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    /// Backing files are unreadable or inconsistent.
    #[error("corrupt save file: {0}")]
    Corrupt(String),

    /// Keys must be non-empty and at most 255 bytes.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A stored value does not have the requested shape.
    #[error("stored value has a different type: {0}")]
    DecodeTypeMismatch(String),

    /// The value could not be encoded.
    #[error("cannot encode value: {0}")]
    Encode(String),

    /// The storage medium failed.
    #[error("storage I/O error: {0}")]
    StorageIo(#[from] io::Error),

    /// The store name cannot name a pair of backing files.
    #[error("{0}")]
    InvalidName(String),

    /// The configuration cannot produce a usable store.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Returns `true` for errors after which the handle is closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::StorageIo(_) | StoreError::Corrupt(_))
    }
}

impl From<PagerError> for StoreError {
    fn from(e: PagerError) -> Self {
        match e {
            PagerError::Io(e) => StoreError::StorageIo(e),
            PagerError::Locked(path) => StoreError::AlreadyOpenElsewhere(path),
            PagerError::InvalidLayout(msg) => StoreError::InvalidConfig(msg),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::InvalidKey(msg) => StoreError::InvalidKey(msg),
            IndexError::InvalidOptions(msg) => StoreError::InvalidConfig(msg),
            IndexError::Pager(e) => e.into(),
            IndexError::KeyNotFound | IndexError::Corrupt(_) => StoreError::Corrupt(e.to_string()),
        }
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::TypeMismatch(msg) => StoreError::DecodeTypeMismatch(msg),
            CodecError::Malformed(msg) => StoreError::Corrupt(format!("undecodable value: {msg}")),
            CodecError::Encode(msg) => StoreError::Encode(msg),
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::InvalidKey(msg) => StoreError::InvalidKey(msg),
            other @ TypeError::InvalidStoreName { .. } => StoreError::InvalidName(other.to_string()),
        }
    }
}

/// Convenience alias for save file results.
pub type StoreResult<T> = Result<T, StoreError>;
