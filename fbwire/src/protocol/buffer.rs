//! Parameter blocks and info buffers.
//!
//! Both use little endian lengths and integers, unlike the rest of the protocol.
//!
//! Parameter block, used for database, transaction and blob parameters:
//!
//! ```text
//! ┏━━━━━━━━━┳━━━━━━┳━━━━━┳━━━━━━━┳━━━━
//! ┃ Version ┃ Item ┃ Len ┃ Value ┃ ..
//! ┣━━━━━━━━━╋━━━━━━╋━━━━━╋━━━━━━━╋━━━━
//! ┃   u8    ┃  u8  ┃ u8  ┃ [u8]  ┃ ..
//! ┗━━━━━━━━━┻━━━━━━┻━━━━━┻━━━━━━━┻━━━━
//! ```
//!
//! A block created with [`ParameterBuffer::upgradable`] switches to its wide version once a
//! value exceeds 255 bytes, every length then takes 4 bytes:
//!
//! ```text
//! ┏━━━━━━━━━┳━━━━━━┳━━━━━━━━┳━━━━━━━┳━━━━
//! ┃ Version ┃ Item ┃  Len   ┃ Value ┃ ..
//! ┣━━━━━━━━━╋━━━━━━╋━━━━━━━━╋━━━━━━━╋━━━━
//! ┃   u8    ┃  u8  ┃ u32 le ┃ [u8]  ┃ ..
//! ┗━━━━━━━━━┻━━━━━━┻━━━━━━━━┻━━━━━━━┻━━━━
//! ```
//!
//! Info reply, terminated by `isc_info_end`:
//!
//! ```text
//! ┏━━━━━━┳━━━━━━━━━┳━━━━━━━┳━━━━┳━━━━━┓
//! ┃ Item ┃   Len   ┃ Value ┃ .. ┃ End ┃
//! ┣━━━━━━╋━━━━━━━━━╋━━━━━━━╋━━━━╋━━━━━┫
//! ┃  u8  ┃ u16 le  ┃ [u8]  ┃ .. ┃  1  ┃
//! ┗━━━━━━┻━━━━━━━━━┻━━━━━━━┻━━━━┻━━━━━┛
//! ```
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ProtocolError, info};
use crate::row::EncodeError;

/// Builder for parameter block.
#[derive(Clone, Debug)]
pub struct ParameterBuffer {
    buf: BytesMut,
    /// Version byte with 32 bit lengths, if this block may switch to it.
    wide: Option<u8>,
}

impl ParameterBuffer {
    /// Create parameter block with given version byte.
    pub fn new(version: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(version);
        Self { buf, wide: None }
    }

    /// Create parameter block which switches to `wide` version when a value exceeds 255 bytes.
    ///
    /// Every item of such block has a length, [`ParameterBuffer::flag`] must not be used.
    pub fn upgradable(version: u8, wide: u8) -> Self {
        Self { wide: Some(wide), ..Self::new(version) }
    }

    /// Returns `true` if lengths take 4 bytes.
    pub fn is_wide(&self) -> bool {
        self.wide.is_some_and(|wide| self.buf[0] == wide)
    }

    fn put_item(&mut self, item: u8, len: usize) {
        self.buf.put_u8(item);
        match self.is_wide() {
            true => self.buf.put_u32_le(len as u32),
            false => self.buf.put_u8(len as u8),
        }
    }

    /// Rewrite items with 4 byte lengths.
    fn upgrade(&mut self, wide: u8) {
        let mut items = self.buf.split_off(1).freeze();
        self.buf[0] = wide;
        while let [item, len, ..] = items[..] {
            let len = usize::from(len);
            items.advance(2);
            let value = items.split_to(len.min(items.len()));
            self.buf.put_u8(item);
            self.buf.put_u32_le(value.len() as u32);
            self.buf.put_slice(&value);
        }
    }

    /// Add item without value.
    pub fn flag(&mut self, item: u8) -> &mut Self {
        self.buf.put_u8(item);
        self
    }

    /// Add item with byte value.
    pub fn byte(&mut self, item: u8, value: u8) -> &mut Self {
        self.put_item(item, 1);
        self.buf.put_u8(value);
        self
    }

    /// Add item with 32 bit integer value.
    pub fn int(&mut self, item: u8, value: i32) -> &mut Self {
        self.put_item(item, 4);
        self.buf.put_i32_le(value);
        self
    }

    /// Add item with bytes value.
    ///
    /// # Errors
    ///
    /// Value longer than 255 bytes is [`EncodeError::Overflow`] unless the block is
    /// [upgradable][ParameterBuffer::upgradable], nothing is written.
    pub fn bytes(&mut self, item: u8, value: &[u8]) -> Result<&mut Self, EncodeError> {
        let max = match self.wide {
            Some(_) => u32::MAX as usize,
            None => usize::from(u8::MAX),
        };
        if value.len() > max {
            return Err(EncodeError::Overflow { len: value.len(), max });
        }
        if let Some(wide) = self.wide.filter(|_| value.len() > usize::from(u8::MAX) && !self.is_wide()) {
            self.upgrade(wide);
        }
        self.put_item(item, value.len());
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Add item with string value, see [`ParameterBuffer::bytes`].
    pub fn string(&mut self, item: u8, value: &str) -> Result<&mut Self, EncodeError> {
        self.bytes(item, value.as_bytes())
    }

    /// Returns `true` if there is no item besides the version.
    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 1
    }

    /// Returns the encoded block.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Convert into encoded block.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Decode little endian integer of 1 to 8 bytes.
pub fn vax_integer(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for (shift, &b) in bytes.iter().take(8).enumerate() {
        value |= i64::from(b) << (shift * 8);
    }
    // sign extend
    match bytes.len() {
        len @ 1..8 if bytes[len - 1] & 0x80 != 0 => value | (-1i64 << (len * 8)),
        _ => value,
    }
}

/// Sequential reader of info reply.
#[derive(Debug)]
pub struct InfoReader {
    data: Bytes,
}

impl InfoReader {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Read next item code.
    ///
    /// Returns `None` at `isc_info_end` or end of data.
    pub fn next_item(&mut self) -> Option<u8> {
        if self.data.is_empty() {
            return None;
        }
        match self.data.get_u8() {
            info::END => None,
            item => Some(item),
        }
    }

    /// Read length prefixed value of `item`.
    pub fn value(&mut self, item: u8) -> Result<Bytes, ProtocolError> {
        if self.data.remaining() < 2 {
            return Err(ProtocolError::invalid_info(item, "missing length"));
        }
        let len = usize::from(self.data.get_u16_le());
        if len > self.data.remaining() {
            return Err(ProtocolError::invalid_info(item, "length exceeds buffer"));
        }
        Ok(self.data.split_to(len))
    }

    /// Read length prefixed integer value of `item`.
    pub fn int(&mut self, item: u8) -> Result<i64, ProtocolError> {
        Ok(vax_integer(&self.value(item)?))
    }

    /// Read length prefixed integer value of `item` which must fit `i32`.
    pub fn int32(&mut self, item: u8) -> Result<i32, ProtocolError> {
        i32::try_from(self.int(item)?)
            .map_err(|_| ProtocolError::invalid_info(item, "integer out of range"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parameter_buffer() {
        let mut pb = ParameterBuffer::new(1);
        assert!(pb.is_empty());
        pb.string(28, "SYSDBA").unwrap().int(63, 3).byte(3, 1).flag(9);
        assert!(!pb.is_empty());
        assert_eq!(
            pb.as_bytes(),
            b"\x01\x1c\x06SYSDBA\x3f\x04\x03\0\0\0\x03\x01\x01\x09"
        );
    }

    #[test]
    fn long_value_rejected() {
        let mut pb = ParameterBuffer::new(1);
        pb.byte(3, 1);
        pb.bytes(84, &[b'a'; 255]).unwrap();
        assert_eq!(pb.as_bytes().len(), 4 + 2 + 255);

        assert!(matches!(
            pb.bytes(84, &[b'a'; 256]),
            Err(EncodeError::Overflow { len: 256, max: 255 })
        ));
        assert_eq!(pb.as_bytes().len(), 4 + 2 + 255);
    }

    #[test]
    fn long_value_upgrades() {
        let mut pb = ParameterBuffer::upgradable(1, 2);
        pb.string(28, "SYSDBA").unwrap().int(63, 3);
        assert!(!pb.is_wide());

        let value = [b'A'; 256];
        pb.bytes(84, &value).unwrap().byte(3, 1);
        assert!(pb.is_wide());

        let mut expected = b"\x02\x1c\x06\0\0\0SYSDBA\x3f\x04\0\0\0\x03\0\0\0\x54\0\x01\0\0".to_vec();
        expected.extend_from_slice(&value);
        expected.extend_from_slice(b"\x03\x01\0\0\0\x01");
        assert_eq!(pb.as_bytes(), &expected[..]);
    }

    #[test]
    fn vax() {
        assert_eq!(vax_integer(&[]), 0);
        assert_eq!(vax_integer(&[0x01, 0x02]), 0x0201);
        assert_eq!(vax_integer(&[0xff, 0xff, 0xff, 0xff]), -1);
        assert_eq!(vax_integer(&[0xff]), -1);
        assert_eq!(vax_integer(&[0x10, 0, 0, 0, 0, 0, 0, 0]), 16);
    }

    #[test]
    fn info_reader() {
        let mut r = InfoReader::new(Bytes::from_static(b"\x06\x04\0\x10\0\0\0\x05\x02\0\xff\x7f\x01\x09"));
        assert_eq!(r.next_item(), Some(info::BLOB_TOTAL_LENGTH));
        assert_eq!(r.int(info::BLOB_TOTAL_LENGTH).unwrap(), 16);
        assert_eq!(r.next_item(), Some(info::BLOB_MAX_SEGMENT));
        assert_eq!(r.int32(info::BLOB_MAX_SEGMENT).unwrap(), 0x7fff);
        assert_eq!(r.next_item(), None);
    }

    #[test]
    fn info_reader_overflow() {
        let mut r = InfoReader::new(Bytes::from_static(b"\x06\x09\0\x10"));
        let item = r.next_item().unwrap();
        assert!(matches!(r.value(item), Err(ProtocolError::InvalidInfo { item: 6, .. })));
    }
}
