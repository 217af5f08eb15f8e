//! Length + CRC framing for structured pages.
//!
//! On-disk format:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode)]
//! ```
//!
//! A zero length marks an unwritten frame, so a zero-filled buffer never
//! decodes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PagerError, PagerResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frame a payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validate a frame at the start of `buf` and return its payload.
pub fn unframe(buf: &[u8]) -> PagerResult<&[u8]> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(PagerError::Corrupt(format!(
            "frame truncated: {} bytes",
            buf.len()
        )));
    }

    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected_crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if length == 0 || FRAME_HEADER_SIZE + length > buf.len() {
        return Err(PagerError::Corrupt(format!(
            "invalid frame length {length} in {}-byte buffer",
            buf.len()
        )));
    }

    let payload = &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length];
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(PagerError::Corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }

    Ok(payload)
}

/// Serialize `value` with bincode and frame it, failing if the frame
/// exceeds `limit` bytes.
pub fn encode_framed<T: Serialize>(value: &T, limit: usize) -> PagerResult<Vec<u8>> {
    let payload =
        bincode::serialize(value).map_err(|e| PagerError::Serialization(e.to_string()))?;
    let framed = frame(&payload);
    if framed.len() > limit {
        return Err(PagerError::PageOverflow {
            len: framed.len(),
            page_size: limit,
        });
    }
    Ok(framed)
}

/// Validate the frame at the start of `buf` and deserialize its payload.
pub fn decode_framed<T: DeserializeOwned>(buf: &[u8]) -> PagerResult<T> {
    let payload = unframe(buf)?;
    bincode::deserialize(payload)
        .map_err(|e| PagerError::Corrupt(format!("undecodable page payload: {e}")))
}
