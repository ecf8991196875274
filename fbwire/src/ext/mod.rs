use crate::row::EncodeError;

/// Lengths are `usize` in rust, while the wire wants fixed width integers.
pub trait UsizeExt {
    /// Length as wire `i32`, overflow is [`EncodeError::Overflow`] instead of wrapping.
    fn to_i32(self) -> Result<i32, EncodeError>;
    /// Length as info buffer `u16`, overflow is [`EncodeError::Overflow`] instead of wrapping.
    fn to_u16(self) -> Result<u16, EncodeError>;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_i32(self) -> Result<i32, EncodeError> {
        self.try_into().map_err(|_| EncodeError::Overflow { len: self, max: i32::MAX as usize })
    }

    fn to_u16(self) -> Result<u16, EncodeError> {
        self.try_into().map_err(|_| EncodeError::Overflow { len: self, max: u16::MAX as usize })
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
