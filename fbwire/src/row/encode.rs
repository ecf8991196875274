use bytes::Bytes;
use std::fmt;

use super::{FieldDescriptor, sql_type};
use crate::blob::BlobId;

/// A statement parameter.
///
/// The value is converted to the wire form of the parameter type reported by the server
/// when the statement executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    /// Integer, unscaled. Scaled numeric fields receive `value * 10^-scale`.
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Bytes),
    Bool(bool),
    Blob(BlobId),
    /// Days since 1858-11-17.
    Date(i32),
    /// Ten thousandths of a second since midnight.
    Time(u32),
    /// Date and time as in [`Param::Date`] and [`Param::Time`].
    Timestamp(i32, u32),
}

impl Param {
    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Bool(_) => "boolean",
            Self::Blob(_) => "blob",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(..) => "timestamp",
        }
    }

    /// Encode as field data of `field`.
    pub fn encode(&self, field: &FieldDescriptor) -> Result<Option<Bytes>, EncodeError> {
        use sql_type::*;

        let mismatch = || EncodeError::TypeMismatch { param: self.kind(), sql_type: field.sql_type() };

        let bytes = match (self, field.sql_type()) {
            (Self::Null, _) => return Ok(None),

            (Self::Int(v), SHORT | LONG | INT64) => integer(field, scaled(*v, field.scale())?)?,
            (Self::Int(v), FLOAT) => Bytes::copy_from_slice(&(*v as f32).to_be_bytes()),
            (Self::Int(v), DOUBLE | D_FLOAT) => Bytes::copy_from_slice(&(*v as f64).to_be_bytes()),
            (Self::Int(v), BOOLEAN) => Bytes::copy_from_slice(&[u8::from(*v != 0)]),
            (Self::Int(v), TEXT | VARYING) => text(field, itoa::Buffer::new().format(*v).as_bytes())?,

            (Self::Double(v), SHORT | LONG | INT64) => {
                let value = v * 10f64.powi(-field.scale());
                if !value.is_finite() || value.abs() >= i64::MAX as f64 {
                    return Err(EncodeError::OutOfRange);
                }
                integer(field, value.round() as i64)?
            }
            (Self::Double(v), FLOAT) => Bytes::copy_from_slice(&(*v as f32).to_be_bytes()),
            (Self::Double(v), DOUBLE | D_FLOAT) => Bytes::copy_from_slice(&v.to_be_bytes()),
            (Self::Double(v), TEXT | VARYING) => text(field, v.to_string().as_bytes())?,

            (Self::Text(v), TEXT | VARYING) => text(field, v.as_bytes())?,
            (Self::Text(v), SHORT | LONG | INT64) => {
                let value = v.trim().parse::<i64>().map_err(|_| EncodeError::Parse(v.clone()))?;
                integer(field, scaled(value, field.scale())?)?
            }
            (Self::Text(v), FLOAT | DOUBLE | D_FLOAT) => {
                let value = v.trim().parse::<f64>().map_err(|_| EncodeError::Parse(v.clone()))?;
                return Self::Double(value).encode(field);
            }
            (Self::Text(v), BOOLEAN) => match v.trim() {
                s if s.eq_ignore_ascii_case("true") => Bytes::from_static(&[1]),
                s if s.eq_ignore_ascii_case("false") => Bytes::from_static(&[0]),
                _ => return Err(EncodeError::Parse(v.clone())),
            },

            (Self::Bytes(v), TEXT | VARYING) => text(field, v)?,

            (Self::Bool(v), BOOLEAN) => Bytes::copy_from_slice(&[u8::from(*v)]),
            (Self::Bool(v), SHORT | LONG | INT64) => integer(field, i64::from(*v))?,
            (Self::Bool(v), TEXT | VARYING) => text(field, if *v { &b"true"[..] } else { b"false" })?,

            (Self::Blob(id), BLOB | QUAD | ARRAY) => Bytes::copy_from_slice(&id.0.to_be_bytes()),

            (Self::Date(d), TYPE_DATE) => Bytes::copy_from_slice(&d.to_be_bytes()),
            (Self::Time(t), TYPE_TIME) => Bytes::copy_from_slice(&t.to_be_bytes()),
            (Self::Timestamp(d, t), TIMESTAMP) => {
                let mut buf = [0u8; 8];
                buf[..4].copy_from_slice(&d.to_be_bytes());
                buf[4..].copy_from_slice(&t.to_be_bytes());
                Bytes::copy_from_slice(&buf)
            }
            (Self::Timestamp(d, _), TYPE_DATE) => Bytes::copy_from_slice(&d.to_be_bytes()),

            _ => return Err(mismatch()),
        };
        Ok(Some(bytes))
    }
}

/// Apply the field scale to an unscaled integer.
fn scaled(value: i64, scale: i32) -> Result<i64, EncodeError> {
    if scale >= 0 {
        return Ok(value);
    }
    10i64
        .checked_pow(scale.unsigned_abs())
        .and_then(|factor| value.checked_mul(factor))
        .ok_or(EncodeError::OutOfRange)
}

/// Integer in the width of `field`, shorts travel as 32 bit integer.
fn integer(field: &FieldDescriptor, value: i64) -> Result<Bytes, EncodeError> {
    match field.sql_type() {
        sql_type::SHORT => {
            let value = i16::try_from(value).map_err(|_| EncodeError::OutOfRange)?;
            Ok(Bytes::copy_from_slice(&i32::from(value).to_be_bytes()))
        }
        sql_type::LONG => {
            let value = i32::try_from(value).map_err(|_| EncodeError::OutOfRange)?;
            Ok(Bytes::copy_from_slice(&value.to_be_bytes()))
        }
        _ => Ok(Bytes::copy_from_slice(&value.to_be_bytes())),
    }
}

fn text(field: &FieldDescriptor, value: &[u8]) -> Result<Bytes, EncodeError> {
    let max = usize::try_from(field.length()).unwrap_or(0);
    if value.len() > max {
        return Err(EncodeError::TooLong { len: value.len(), max });
    }
    Ok(Bytes::copy_from_slice(value))
}

macro_rules! from {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {$(
        impl From<$ty> for Param {
            fn from($v: $ty) -> Self {
                $body
            }
        }
    )*};
}

from! {
    i16 => |v| Self::Int(v.into());
    i32 => |v| Self::Int(v.into());
    i64 => |v| Self::Int(v);
    f32 => |v| Self::Double(v.into());
    f64 => |v| Self::Double(v);
    bool => |v| Self::Bool(v);
    String => |v| Self::Text(v);
    &str => |v| Self::Text(v.into());
    Bytes => |v| Self::Bytes(v);
    Vec<u8> => |v| Self::Bytes(v.into());
    &[u8] => |v| Self::Bytes(Bytes::copy_from_slice(v));
    BlobId => |v| Self::Blob(v);
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

/// Ordered statement parameters.
///
/// ```
/// use fbwire::row::Params;
///
/// let params = Params::new().bind(420).bind("Foo").bind(None::<i64>);
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind next parameter.
    pub fn bind(mut self, value: impl Into<Param>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Push next parameter.
    pub fn push(&mut self, value: impl Into<Param>) {
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.values.iter()
    }
}

impl<P: Into<Param>> FromIterator<P> for Params {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(Into::into).collect() }
    }
}

/// An error when encoding a parameter.
pub enum EncodeError {
    /// Field type has no wire encoding in this crate.
    UnsupportedType(i32),
    /// Parameter can not be converted to the field type.
    TypeMismatch { param: &'static str, sql_type: i32 },
    /// Value does not fit the field.
    OutOfRange,
    /// Text longer than the field.
    TooLong { len: usize, max: usize },
    /// Text is not a valid value of the field type.
    Parse(String),
    /// Number of values differs from the number of fields.
    Count { expected: usize, found: usize },
    /// Length does not fit its wire length prefix.
    Overflow { len: usize, max: usize },
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to encode value, ")?;
        match self {
            Self::UnsupportedType(ty) => write!(f, "unsupported field type {ty}"),
            Self::TypeMismatch { param, sql_type } => {
                write!(f, "{param} can not be sent as field type {sql_type}")
            }
            Self::OutOfRange => f.write_str("value out of range"),
            Self::TooLong { len, max } => write!(f, "value of {len} bytes exceeds field length {max}"),
            Self::Parse(text) => write!(f, "invalid value {text:?}"),
            Self::Count { expected, found } => write!(f, "expected {expected} values, found {found}"),
            Self::Overflow { len, max } => write!(f, "length {len} exceeds wire limit {max}"),
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
