use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use super::{FieldDescriptor, RowDescriptor, RowValue, sql_type};
use crate::blob::BlobId;

/// Firebird field value.
#[derive(Debug, Clone)]
pub struct Column<'a> {
    field: &'a FieldDescriptor,
    value: Option<Bytes>,
}

impl<'a> Column<'a> {
    pub(crate) fn new(field: &'a FieldDescriptor, value: Option<Bytes>) -> Self {
        Self { field, value }
    }

    /// Returns the field description.
    pub fn field(&self) -> &'a FieldDescriptor {
        self.field
    }

    /// Returns column label.
    pub fn name(&self) -> &'a str {
        self.field.alias()
    }

    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Consume self into the inner [`Bytes`].
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    /// Try consume self into the inner [`Bytes`].
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }

    /// Check the field type is one of `expected`.
    pub(crate) fn expect_type(&self, expected: &[i32]) -> Result<(), DecodeError> {
        match expected.contains(&self.field.sql_type()) {
            true => Ok(()),
            false => Err(DecodeError::TypeMismatch(self.field.sql_type())),
        }
    }

    /// Non null value of exactly `N` bytes.
    pub(crate) fn fixed<const N: usize>(self) -> Result<[u8; N], DecodeError> {
        let value = self.try_into_value()?;
        value[..]
            .try_into()
            .map_err(|_| DecodeError::InvalidLength { expected: N, found: value.len() })
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: RowValue) -> Result<Self, DecodeError>;
}

impl FromRow for RowValue {
    fn from_row(row: RowValue) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: RowValue) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: RowValue) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);

/// A type that can be constructed from [`Column`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column<'_>) -> Result<Self, DecodeError>;
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column<'_>) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Column<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl Decode for i16 {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::SHORT])?;
        // shorts travel as 32 bit integer
        let value = i32::from_be_bytes(col.fixed()?);
        i16::try_from(value).map_err(|_| DecodeError::OutOfRange)
    }
}

impl Decode for i32 {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::SHORT, sql_type::LONG])?;
        Ok(i32::from_be_bytes(col.fixed()?))
    }
}

impl Decode for i64 {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        match col.field.sql_type() {
            sql_type::SHORT | sql_type::LONG => Ok(i32::from_be_bytes(col.fixed()?).into()),
            sql_type::INT64 => Ok(i64::from_be_bytes(col.fixed()?)),
            found => Err(DecodeError::TypeMismatch(found)),
        }
    }
}

impl Decode for f32 {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::FLOAT])?;
        Ok(f32::from_be_bytes(col.fixed()?))
    }
}

impl Decode for f64 {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        match col.field.sql_type() {
            sql_type::FLOAT => Ok(f32::from_be_bytes(col.fixed()?).into()),
            sql_type::DOUBLE | sql_type::D_FLOAT => Ok(f64::from_be_bytes(col.fixed()?)),
            found => Err(DecodeError::TypeMismatch(found)),
        }
    }
}

impl Decode for bool {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::BOOLEAN])?;
        let [value] = col.fixed()?;
        Ok(value != 0)
    }
}

impl Decode for String {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::TEXT, sql_type::VARYING])?;
        Ok(String::from_utf8(col.try_into_value()?.into())?)
    }
}

impl Decode for Vec<u8> {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        Ok(col.try_into_value()?.into())
    }
}

impl Decode for Bytes {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.try_into_value()
    }
}

impl Decode for BlobId {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::BLOB, sql_type::QUAD, sql_type::ARRAY])?;
        Ok(BlobId(i64::from_be_bytes(col.fixed()?)))
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the zero based position in `descriptor`.
    fn position(self, descriptor: &RowDescriptor) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, descriptor: &RowDescriptor) -> Result<usize, DecodeError> {
        match self < descriptor.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, descriptor: &RowDescriptor) -> Result<usize, DecodeError> {
        descriptor
            .position(self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Firebird return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Field type can not be decoded into the requested type.
    TypeMismatch(i32),
    /// Field data has unexpected length.
    InvalidLength { expected: usize, found: usize },
    /// Value does not fit the requested type.
    OutOfRange,
    /// Row is null.
    Null,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMismatch(ty) => write!(f, "data type missmatch, field type is {ty}"),
            Self::InvalidLength { expected, found } => {
                write!(f, "expected {expected} bytes, found {found}")
            }
            Self::OutOfRange => f.write_str("value out of range"),
            Self::Null => write!(f, "unexpected NULL value"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn column<'a>(field: &'a FieldDescriptor, value: &[u8]) -> Column<'a> {
        Column::new(field, Some(Bytes::copy_from_slice(value)))
    }

    #[test]
    fn integers() {
        let short = FieldDescriptor::new(sql_type::SHORT, 2);
        assert_eq!(column(&short, &[0xFF, 0xFF, 0xFF, 0xFE]).decode::<i16>().unwrap(), -2);
        assert!(matches!(column(&short, &[0, 1, 0, 0]).decode::<i16>(), Err(DecodeError::OutOfRange)));
        assert_eq!(column(&short, &[0, 0, 0, 9]).decode::<i64>().unwrap(), 9);

        let int64 = FieldDescriptor::new(sql_type::INT64, 8);
        assert_eq!(column(&int64, &[0, 0, 0, 0, 0, 0, 1, 0]).decode::<i64>().unwrap(), 256);
        assert!(matches!(
            column(&int64, &[0; 8]).decode::<i32>(),
            Err(DecodeError::TypeMismatch(sql_type::INT64))
        ));
        assert!(matches!(
            column(&int64, &[0; 4]).decode::<i64>(),
            Err(DecodeError::InvalidLength { expected: 8, found: 4 })
        ));
    }

    #[test]
    fn floats_and_bool() {
        let double = FieldDescriptor::new(sql_type::DOUBLE, 8);
        assert_eq!(column(&double, &1.5f64.to_be_bytes()).decode::<f64>().unwrap(), 1.5);

        let float = FieldDescriptor::new(sql_type::FLOAT, 4);
        assert_eq!(column(&float, &(-2.0f32).to_be_bytes()).decode::<f64>().unwrap(), -2.0);

        let boolean = FieldDescriptor::new(sql_type::BOOLEAN, 1);
        assert!(column(&boolean, &[1]).decode::<bool>().unwrap());
        assert!(!column(&boolean, &[0]).decode::<bool>().unwrap());
    }

    #[test]
    fn nulls_and_strings() {
        let varying = FieldDescriptor::new(sql_type::VARYING | 1, 10);
        let null = Column::new(&varying, None);
        assert!(matches!(null.clone().decode::<String>(), Err(DecodeError::Null)));
        assert_eq!(null.decode::<Option<String>>().unwrap(), None);

        assert_eq!(column(&varying, b"abc").decode::<String>().unwrap(), "abc");
        assert!(column(&varying, b"\xff").decode::<String>().is_err());
        assert_eq!(column(&varying, b"\xff").decode::<Vec<u8>>().unwrap(), b"\xff");
    }

    #[test]
    fn blob_id() {
        let blob = FieldDescriptor::new(sql_type::BLOB, 8);
        let id = column(&blob, &[0, 0, 0, 1, 0, 0, 0, 2]).decode::<BlobId>().unwrap();
        assert_eq!(id, BlobId(0x1_0000_0002));
    }

    #[test]
    fn index() {
        let descriptor = RowDescriptor::new([FieldDescriptor::new(sql_type::LONG, 4).with_alias("A")]);
        assert_eq!(0.position(&descriptor).unwrap(), 0);
        assert!(matches!(1.position(&descriptor), Err(DecodeError::IndexOutOfBounds(1))));
        assert!(matches!("B".position(&descriptor), Err(DecodeError::ColumnNotFound(_))));
    }
}
