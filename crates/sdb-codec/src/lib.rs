//! Value codec for the sdb save-file store.
//!
//! Values are encoded as JSON through `serde`. Reference identity is carried
//! by [`Shared`]: an instance reachable several times from one value is
//! written once and referenced by ordinal afterwards, and decoding restores a
//! single instance for all of those occurrences. Cyclic graphs round-trip.
//!
//! # Key Types
//!
//! - [`encode`] / [`decode`] -- Convert between values and bytes
//! - [`Shared`] -- Identity-preserving `Rc<RefCell<T>>` handle
//! - [`geometry`] -- Plain vector, color, rectangle, bounds and matrix types

pub mod error;
mod finite;
pub mod geometry;
mod scope;
pub mod shared;

pub use error::{CodecError, CodecResult};
pub use geometry::{
    Bounds, Color, Matrix4x4, Quaternion, Rect, RectOffset, Vector2, Vector2Int, Vector3,
    Vector3Int, Vector4,
};
pub use shared::Shared;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

/// Encode `value` into bytes.
///
/// Ordinals of [`Shared`] instances are assigned in depth-first order and are
/// local to this call.
///
/// Fails with [`CodecError::Encode`] if `value` holds a NaN or infinite
/// `f32`/`f64`, since the encoding could not be read back. The
/// [`geometry`] types store such components as strings and are accepted.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    {
        let _scope = scope::enter_encode();
        finite::check(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    }

    let _scope = scope::enter_encode();
    let bytes = serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    trace!(len = bytes.len(), "encoded value");
    Ok(bytes)
}

/// Decode bytes produced by [`encode`] as a `T`.
///
/// Fails with [`CodecError::TypeMismatch`] when the encoding is valid but has
/// a different shape than `T`, and with [`CodecError::Malformed`] when the
/// bytes are not a valid encoding at all.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let _scope = scope::enter_decode();
    serde_json::from_slice(bytes).map_err(CodecError::from_decode)
}
