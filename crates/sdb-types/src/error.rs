use thiserror::Error;

/// Errors produced by type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid store name {name:?}: {reason}")]
    InvalidStoreName { name: String, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Result alias for type validation.
pub type TypeResult<T> = Result<T, TypeError>;
