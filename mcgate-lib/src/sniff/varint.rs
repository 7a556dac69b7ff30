//! VarInt and string primitives of the game wire format.

use bytes::{BufMut, BytesMut};

use crate::error::SniffError;

/// Maximum encoded size of a 32-bit VarInt.
pub const MAX_VARINT_LEN: usize = 5;

/// Decode a VarInt starting at `pos`.
///
/// Returns `Ok(None)` when the buffer ends before the VarInt does, and
/// `(value, bytes_read)` otherwise.
pub fn read_varint(buf: &[u8], pos: usize) -> Result<Option<(i32, usize)>, SniffError> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(pos.saturating_add(i)) else {
            return Ok(None);
        };
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((result as i32, i + 1)));
        }
    }
    Err(SniffError::Malformed("varint too long"))
}

pub fn write_varint(value: i32, out: &mut BytesMut) {
    let mut n = value as u32;
    loop {
        let mut byte = (n & 0x7F) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if n == 0 {
            break;
        }
    }
}

/// Read a length-prefixed UTF-8 string that must end before `limit`.
pub fn read_string(buf: &[u8], pos: usize, limit: usize) -> Result<(String, usize), SniffError> {
    let (len, n) = read_varint(&buf[..limit.min(buf.len())], pos)?
        .ok_or(SniffError::Malformed("truncated string length"))?;
    let len = usize::try_from(len).map_err(|_| SniffError::Malformed("negative string length"))?;
    let start = pos + n;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= limit && *end <= buf.len())
        .ok_or(SniffError::Malformed("truncated string"))?;
    let s = std::str::from_utf8(&buf[start..end])
        .map_err(|_| SniffError::Malformed("string is not utf-8"))?;
    Ok((s.to_string(), n + len))
}

pub fn write_string(value: &str, out: &mut BytesMut) {
    write_varint(value.len() as i32, out);
    out.put_slice(value.as_bytes());
}

/// Prefix `payload` with its VarInt length.
pub fn frame(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + MAX_VARINT_LEN);
    write_varint(payload.len() as i32, &mut out);
    out.put_slice(payload);
    out
}
