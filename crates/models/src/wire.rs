//! Primitives of the canonical length-prefixed encoding used by record
//! variants and persisted payloads. All integers are big-endian so that
//! encoded keys sort in numeric order.

use bytes::{Buf, BufMut};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unknown tag {0}")]
    UnknownTag(u32),
    #[error("trailing {0} bytes after value")]
    TrailingBytes(usize),
    #[error("length prefix {0} exceeds remaining input")]
    BadLength(usize),
    #[error("string is not valid UTF-8")]
    BadUtf8,
    #[error("malformed embedded message")]
    BadMessage,
}

pub fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.put_u32(b.len() as u32);
    buf.put_slice(b);
}

pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>, Error> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::BadLength(len));
    }
    let mut out = vec![0; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn get_str(buf: &mut &[u8]) -> Result<String, Error> {
    let b = get_bytes(buf)?;
    String::from_utf8(b).map_err(|_| Error::BadUtf8)
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.put_u32(v);
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32, Error> {
    if buf.remaining() < 4 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u32())
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.put_u64(v);
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64, Error> {
    if buf.remaining() < 8 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u64())
}

pub fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.put_u8(v);
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8, Error> {
    if buf.remaining() < 1 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

pub fn get_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], Error> {
    if buf.remaining() < N {
        return Err(Error::UnexpectedEof);
    }
    let mut out = [0; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Finish a decode, rejecting unconsumed input.
pub fn expect_eof(buf: &[u8]) -> Result<(), Error> {
    if !buf.is_empty() {
        return Err(Error::TrailingBytes(buf.len()));
    }
    Ok(())
}
