//! Binary serialization
//!
//! Every value that crosses the wire (and every header that gets hashed) is
//! written big-endian through [`Writeable`] and parsed back through
//! [`Readable`]. Writing never fails: anything with a size limit is checked
//! when the value is built. Reading treats its input as untrusted, so every
//! length prefix is bounded before anything is allocated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while framing or parsing wire data
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("Unexpected message type: expected {expected}, got {got}")]
    UnexpectedMessageType { expected: u8, got: u8 },
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("Message too large: {len} bytes (max: {max})")]
    Oversized { len: usize, max: usize },
    #[error("Invalid address family: {0}")]
    InvalidAddressFamily(u8),
    #[error("User agent too long: {len} bytes (max: {max})")]
    UserAgentTooLong { len: u64, max: usize },
    #[error("User agent is not valid UTF-8")]
    InvalidUtf8,
    #[error("Incompatible protocol version: ours {ours}, theirs {theirs}")]
    IncompatibleVersion { ours: u32, theirs: u32 },
    #[error("Too many {what}: {count} (max: {max})")]
    TooManyItems {
        what: &'static str,
        count: u64,
        max: usize,
    },
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Values with a canonical binary encoding
pub trait Writeable {
    fn write(&self, buf: &mut BytesMut);

    /// Encode into a fresh buffer
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write(&mut buf);
        buf.freeze()
    }
}

/// Values that can be parsed from untrusted bytes
pub trait Readable: Sized {
    fn read(buf: &mut Bytes) -> Result<Self, WireError>;
}

fn ensure(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated {
            needed: n - buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn read_i64(buf: &mut Bytes) -> Result<i64, WireError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn read_array<const N: usize>(buf: &mut Bytes) -> Result<[u8; N], WireError> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Read a `u64` length prefix, rejecting anything above `max`
pub fn read_len(buf: &mut Bytes, what: &'static str, max: usize) -> Result<usize, WireError> {
    let count = read_u64(buf)?;
    if count > max as u64 {
        return Err(WireError::TooManyItems { what, count, max });
    }
    Ok(count as usize)
}

/// Read `u64 len | bytes` with `len <= max`
pub fn read_var_bytes(
    buf: &mut Bytes,
    what: &'static str,
    max: usize,
) -> Result<Vec<u8>, WireError> {
    let len = read_len(buf, what, max)?;
    ensure(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

pub fn write_var_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u64(bytes.len() as u64);
    buf.put_slice(bytes);
}

/// Read a `u64`-prefixed sequence of at most `max` items
pub fn read_vec<T: Readable>(
    buf: &mut Bytes,
    what: &'static str,
    max: usize,
) -> Result<Vec<T>, WireError> {
    let count = read_len(buf, what, max)?;
    let mut items = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        items.push(T::read(buf)?);
    }
    Ok(items)
}

pub fn write_vec<T: Writeable>(buf: &mut BytesMut, items: &[T]) {
    buf.put_u64(items.len() as u64);
    for item in items {
        item.write(buf);
    }
}
