//! Low-level wire primitives shared by the envelope and message codecs.
//!
//! Integers are LEB128 varints (signed values are zigzag encoded first),
//! strings and byte strings are varint-length-prefixed, floats are 8-byte
//! little endian. Readers take `&mut &[u8]` and advance it past what they
//! consumed.

use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes};

/// Maximum number of bytes a u64 varint may occupy.
const MAX_VARINT_LEN: usize = 10;

pub fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_varint(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = get_u8(buf)?;
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::VarintOverflow)
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn put_i64(buf: &mut impl BufMut, value: i64) {
    put_varint(buf, zigzag(value));
}

pub fn get_i64(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    get_varint(buf).map(unzigzag)
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn put_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn get_bool(buf: &mut &[u8]) -> Result<bool, DecodeError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::UnknownTag {
            context: "bool",
            tag: u64::from(other),
        }),
    }
}

pub fn put_f64(buf: &mut impl BufMut, value: f64) {
    buf.put_f64_le(value);
}

pub fn get_f64(buf: &mut &[u8]) -> Result<f64, DecodeError> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_f64_le())
}

/// Read a varint length and check the buffer actually holds that many bytes.
pub fn get_len(buf: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::LengthTooLarge(len))?;
    ensure_remaining(buf, len)?;
    Ok(len)
}

/// Read a collection element count.
///
/// Every element occupies at least one byte, so a count larger than the
/// remaining input is rejected before anything is allocated.
pub fn get_count(buf: &mut &[u8]) -> Result<usize, DecodeError> {
    let count = get_varint(buf)?;
    match usize::try_from(count) {
        Ok(n) if n <= buf.len() => Ok(n),
        _ => Err(DecodeError::LengthTooLarge(count)),
    }
}

pub fn put_bytes(buf: &mut impl BufMut, value: &[u8]) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

pub fn get_bytes(buf: &mut &[u8]) -> Result<Bytes, DecodeError> {
    let len = get_len(buf)?;
    Ok(buf.copy_to_bytes(len))
}

pub fn put_str(buf: &mut impl BufMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub fn get_str(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = get_len(buf)?;
    let (head, tail) = buf.split_at(len);
    let s = std::str::from_utf8(head)
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    *buf = tail;
    Ok(s)
}

/// Fail with [`DecodeError::TrailingBytes`] unless the input is exhausted.
pub fn ensure_empty(buf: &[u8]) -> Result<(), DecodeError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::TrailingBytes(buf.len()))
    }
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        Err(DecodeError::Truncated {
            needed: needed - buf.len(),
        })
    } else {
        Ok(())
    }
}
