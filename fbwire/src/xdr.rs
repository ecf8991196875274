//! Binary codec.
//!
//! Every message is a sequence of:
//!
//! - integers, big endian, 32 bit unless a field is explicitly 64 bit
//! - opaque buffers, a 32 bit length, the bytes, then zero padding to the next 4 byte boundary
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━┳━━━━━━━━━━━┓
//! ┃       Length      ┃     Bytes    ┃  Padding  ┃
//! ┣━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━╋━━━━━━━━━━━┫
//! ┃        i32        ┃  [u8; len]   ┃ 0..=3 nul ┃
//! ┗━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━━━━━┻━━━━━━━━━━━┛
//! ```
//!
//! Padding is generated on write and skipped, not validated, on read.
//!
//! Blob data uses a segment stream instead, `(u16 little endian length, bytes)` repeated.
use bytes::{Buf, BufMut, Bytes};

use crate::{ext::UsizeExt, protocol::ProtocolError, row::EncodeError};

/// Number of padding bytes following `len` bytes of data.
pub const fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

/// XDR write operation in [`BufMut`].
pub trait XdrBufMut: BufMut {
    /// Write 32 bit integer.
    fn put_xdr_i32(&mut self, value: i32) {
        self.put_i32(value);
    }

    /// Write 64 bit integer.
    fn put_xdr_i64(&mut self, value: i64) {
        self.put_i64(value);
    }

    /// Write length prefixed and padded opaque buffer.
    ///
    /// Nothing is written if the length does not fit `i32`.
    fn put_xdr_buffer(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.put_i32(bytes.len().to_i32()?);
        self.put_slice(bytes);
        self.put_bytes(0, padding(bytes.len()));
        Ok(())
    }

    /// Write string as opaque buffer.
    fn put_xdr_string(&mut self, string: &str) -> Result<(), EncodeError> {
        self.put_xdr_buffer(string.as_bytes())
    }

    /// Write exactly `len` bytes of `bytes`, truncating or filling with `fill`, then padding.
    fn put_xdr_fixed(&mut self, bytes: &[u8], len: usize, fill: u8) {
        let n = bytes.len().min(len);
        self.put_slice(&bytes[..n]);
        self.put_bytes(fill, len - n);
        self.put_bytes(0, padding(len));
    }
}

impl<B: BufMut + ?Sized> XdrBufMut for B { }

/// Checked XDR read operation.
///
/// Reading past the end returns [`ProtocolError`] instead of panicking.
pub trait XdrBuf {
    /// Read 32 bit integer.
    fn get_xdr_i32(&mut self) -> Result<i32, ProtocolError>;

    /// Read 64 bit integer.
    fn get_xdr_i64(&mut self) -> Result<i64, ProtocolError>;

    /// Read length prefixed opaque buffer, padding skipped.
    fn get_xdr_buffer(&mut self) -> Result<Bytes, ProtocolError>;

    /// Read `len` bytes, padding skipped.
    fn get_xdr_fixed(&mut self, len: usize) -> Result<Bytes, ProtocolError>;
}

fn ensure(buf: &Bytes, len: usize) -> Result<(), ProtocolError> {
    match buf.remaining() < len {
        true => Err(ProtocolError::truncated(len, buf.remaining())),
        false => Ok(()),
    }
}

impl XdrBuf for Bytes {
    fn get_xdr_i32(&mut self) -> Result<i32, ProtocolError> {
        ensure(self, 4)?;
        Ok(self.get_i32())
    }

    fn get_xdr_i64(&mut self) -> Result<i64, ProtocolError> {
        ensure(self, 8)?;
        Ok(self.get_i64())
    }

    fn get_xdr_buffer(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.get_xdr_i32()?;
        let Ok(len) = usize::try_from(len) else {
            return Err(ProtocolError::InvalidLength(len));
        };
        self.get_xdr_fixed(len)
    }

    fn get_xdr_fixed(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        ensure(self, len)?;
        let bytes = self.split_to(len);
        // trailing padding of the last item may be absent
        self.advance(padding(len).min(self.remaining()));
        Ok(bytes)
    }
}

/// Write one segment of a segment stream.
///
/// # Errors
///
/// `data` longer than `u16::MAX` is [`EncodeError::Overflow`], nothing is written.
pub fn put_segment(buf: &mut impl BufMut, data: &[u8]) -> Result<(), EncodeError> {
    buf.put_u16_le(data.len().to_u16()?);
    buf.put_slice(data);
    Ok(())
}

/// Iterate segments of a segment stream.
pub fn segments(data: Bytes) -> Segments {
    Segments { data }
}

/// [`Iterator`] over segment stream created by [`segments`].
///
/// A segment length exceeding the remaining data yields
/// [`ProtocolError::CorruptSegment`] and ends the iteration.
#[derive(Debug)]
pub struct Segments {
    data: Bytes,
}

impl Iterator for Segments {
    type Item = Result<Bytes, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        if self.data.remaining() < 2 {
            let remaining = self.data.remaining();
            self.data.clear();
            return Some(Err(ProtocolError::CorruptSegment { len: 2, remaining }));
        }

        let len = usize::from(self.data.get_u16_le());
        if len > self.data.remaining() {
            let remaining = self.data.remaining();
            self.data.clear();
            return Some(Err(ProtocolError::CorruptSegment { len, remaining }));
        }

        Some(Ok(self.data.split_to(len)))
    }
}
