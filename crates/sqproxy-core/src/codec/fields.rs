//! Flat field descriptors used to encode/decode A2S message bodies.
//!
//! The original Python implementation builds each field's encoder/decoder
//! out of composable decorators (`needs_buffer`, `use_self_default`, per-field
//! validator lists). Here each field kind is just a small value-to-bytes /
//! bytes-to-value pair with its own validation baked in -- no decorator
//! chain, no dynamic dispatch.

use std::fmt;

use crate::error::CodecError;

/// Decode a single NUL-terminated, UTF-8 (lossy) string from `buf`.
///
/// Returns the decoded string and the remainder of the buffer after the
/// terminator. Invalid UTF-8 bytes are replaced, never rejected -- matching
/// the original's `decode('utf8', 'ignore')`.
pub fn decode_cstring(buf: &[u8]) -> Result<(String, &[u8]), CodecError> {
    let terminator = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::BufferExhausted)?;
    let (data, rest) = buf.split_at(terminator);
    Ok((String::from_utf8_lossy(data).into_owned(), &rest[1..]))
}

/// Encode a string as a NUL-terminated UTF-8 byte sequence.
pub fn encode_cstring(value: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

/// Decode a fixed-width little-endian integer, failing on a short buffer.
pub fn decode_u8(buf: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    let (byte, rest) = buf.split_first().ok_or(CodecError::BufferExhausted)?;
    Ok((*byte, rest))
}

pub fn decode_i16_le(buf: &[u8]) -> Result<(i16, &[u8]), CodecError> {
    if buf.len() < 2 {
        return Err(CodecError::BufferExhausted);
    }
    let (data, rest) = buf.split_at(2);
    Ok((i16::from_le_bytes([data[0], data[1]]), rest))
}

pub fn decode_i32_le(buf: &[u8]) -> Result<(i32, &[u8]), CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::BufferExhausted);
    }
    let (data, rest) = buf.split_at(4);
    Ok((i32::from_le_bytes([data[0], data[1], data[2], data[3]]), rest))
}

pub fn decode_f32_le(buf: &[u8]) -> Result<(f32, &[u8]), CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::BufferExhausted);
    }
    let (data, rest) = buf.split_at(4);
    Ok((f32::from_le_bytes([data[0], data[1], data[2], data[3]]), rest))
}

/// A decoded field value failing a validator surfaces as `BrokenMessage`,
/// never as a panic -- the codec must tolerate hostile/garbled input.
pub fn require(condition: bool, field: &'static str, value: impl fmt::Display) -> Result<(), CodecError> {
    if condition {
        Ok(())
    } else {
        Err(CodecError::BrokenMessage(format!(
            "invalid value ({value}) for field '{field}'"
        )))
    }
}
