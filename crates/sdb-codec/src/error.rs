//! Error types for the value codec.

use crate::scope::BROKEN_REFERENCE;

/// Errors that can occur while encoding or decoding values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes are well-formed but do not have the requested shape.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The bytes are not a valid encoding.
    #[error("malformed encoding: {0}")]
    Malformed(String),
}

impl CodecError {
    /// Classify a `serde_json` decoding error.
    ///
    /// Data errors are shape mismatches, except for references to undefined
    /// or duplicated instance ids, which mean the bytes are damaged.
    pub(crate) fn from_decode(e: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let msg = e.to_string();
        match e.classify() {
            Category::Data if msg.starts_with(BROKEN_REFERENCE) => CodecError::Malformed(msg),
            Category::Data => CodecError::TypeMismatch(msg),
            Category::Syntax | Category::Eof | Category::Io => CodecError::Malformed(msg),
        }
    }
}

/// Convenience alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;
