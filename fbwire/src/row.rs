//! Firebird row operation.
//!
//! - [`RowDescriptor`]
//! - [`FieldDescriptor`]
//! - [`RowValue`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//! - [`Param`]
//!
//! Rows travel as XDR items, one per field, in the layout described by the BLR of the row.
//! Before protocol 13 each field is followed by a null indicator, from 13 onward the row
//! starts with a null bitmap and null fields are omitted.
use bytes::{BufMut, Bytes, BytesMut};
use std::{fmt, sync::Arc};

use crate::{
    Result,
    ext::{FmtExt, UsizeExt},
    stream::WireStream,
    xdr::{XdrBufMut, padding},
};

mod decode;
mod encode;
#[cfg(feature = "time")]
mod time;

pub use decode::{Column, Decode, DecodeError, FromRow, Index};
pub use encode::{EncodeError, Param, Params};

/// SQL data types, the lowest bit marks a nullable field.
pub mod sql_type {
    pub const VARYING: i32 = 448;
    pub const TEXT: i32 = 452;
    pub const DOUBLE: i32 = 480;
    pub const FLOAT: i32 = 482;
    pub const LONG: i32 = 496;
    pub const SHORT: i32 = 500;
    pub const TIMESTAMP: i32 = 510;
    pub const BLOB: i32 = 520;
    pub const D_FLOAT: i32 = 530;
    pub const ARRAY: i32 = 540;
    pub const QUAD: i32 = 550;
    pub const TYPE_TIME: i32 = 560;
    pub const TYPE_DATE: i32 = 570;
    pub const INT64: i32 = 580;
    pub const INT128: i32 = 32752;
    pub const TIMESTAMP_TZ: i32 = 32754;
    pub const TIME_TZ: i32 = 32756;
    pub const DEC16: i32 = 32760;
    pub const DEC34: i32 = 32762;
    pub const BOOLEAN: i32 = 32764;
    pub const NULL: i32 = 32766;
}

mod blr {
    pub const VERSION5: u8 = 5;
    pub const BEGIN: u8 = 2;
    pub const MESSAGE: u8 = 4;
    pub const END: u8 = 255;
    pub const EOC: u8 = 76;

    pub const SHORT: u8 = 7;
    pub const LONG: u8 = 8;
    pub const QUAD: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const D_FLOAT: u8 = 11;
    pub const SQL_DATE: u8 = 12;
    pub const SQL_TIME: u8 = 13;
    pub const TEXT: u8 = 14;
    pub const INT64: u8 = 16;
    pub const BOOL: u8 = 23;
    pub const DEC64: u8 = 24;
    pub const DEC128: u8 = 25;
    pub const INT128: u8 = 26;
    pub const DOUBLE: u8 = 27;
    pub const SQL_TIME_TZ: u8 = 28;
    pub const TIMESTAMP_TZ: u8 = 29;
    pub const TIMESTAMP: u8 = 35;
    pub const VARYING: u8 = 37;
}

/// Null indicator of a field before protocol 13.
const NULL_INDICATOR: i32 = -1;

/// Description of one field, as reported by statement info.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub(crate) position: usize,
    pub(crate) sql_type: i32,
    pub(crate) sub_type: i32,
    pub(crate) scale: i32,
    pub(crate) length: i32,
    pub(crate) field_name: String,
    pub(crate) relation_name: String,
    pub(crate) owner_name: String,
    pub(crate) alias: String,
}

impl FieldDescriptor {
    /// Field of given type, used to describe values without server metadata.
    pub fn new(sql_type: i32, length: i32) -> Self {
        Self { sql_type, length, ..Default::default() }
    }

    pub fn with_scale(mut self, scale: i32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_sub_type(mut self, sub_type: i32) -> Self {
        self.sub_type = sub_type;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Zero based position in the row.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Type without the nullable bit, see [`sql_type`].
    pub fn sql_type(&self) -> i32 {
        self.sql_type & !1
    }

    pub fn is_nullable(&self) -> bool {
        self.sql_type & 1 == 1
    }

    pub fn sub_type(&self) -> i32 {
        self.sub_type
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Length in bytes.
    pub fn length(&self) -> i32 {
        self.length
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Column label, falls back to the field name.
    pub fn alias(&self) -> &str {
        match self.alias.is_empty() {
            true => &self.field_name,
            false => &self.alias,
        }
    }

    /// Wire layout of this field.
    pub(crate) fn io_length(&self) -> Result<IoLength, EncodeError> {
        use sql_type::*;
        let io = match self.sql_type() {
            VARYING => IoLength::Varying,
            TEXT => IoLength::Fixed(usize::try_from(self.length).unwrap_or(0)),
            SHORT | LONG | FLOAT | TYPE_TIME | TYPE_DATE => IoLength::Fixed(4),
            DOUBLE | D_FLOAT | TIMESTAMP | BLOB | ARRAY | QUAD | INT64 | DEC16 | TIME_TZ => IoLength::Fixed(8),
            TIMESTAMP_TZ => IoLength::Fixed(12),
            INT128 | DEC34 => IoLength::Fixed(16),
            BOOLEAN => IoLength::Fixed(1),
            NULL => IoLength::Null,
            other => return Err(EncodeError::UnsupportedType(other)),
        };
        Ok(io)
    }

    fn write_blr(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        use sql_type::*;
        // scale is sent as signed byte
        let scale = self.scale as u8;
        match self.sql_type() {
            VARYING => {
                buf.put_u8(blr::VARYING);
                buf.put_u16_le(self.length as u16);
            }
            TEXT => {
                buf.put_u8(blr::TEXT);
                buf.put_u16_le(self.length as u16);
            }
            NULL => {
                buf.put_u8(blr::TEXT);
                buf.put_u16_le(0);
            }
            DOUBLE => buf.put_u8(blr::DOUBLE),
            FLOAT => buf.put_u8(blr::FLOAT),
            D_FLOAT => buf.put_u8(blr::D_FLOAT),
            TYPE_DATE => buf.put_u8(blr::SQL_DATE),
            TYPE_TIME => buf.put_u8(blr::SQL_TIME),
            TIMESTAMP => buf.put_u8(blr::TIMESTAMP),
            BLOB | ARRAY => buf.put_slice(&[blr::QUAD, 0]),
            QUAD => buf.put_slice(&[blr::QUAD, scale]),
            LONG => buf.put_slice(&[blr::LONG, scale]),
            SHORT => buf.put_slice(&[blr::SHORT, scale]),
            INT64 => buf.put_slice(&[blr::INT64, scale]),
            INT128 => buf.put_slice(&[blr::INT128, scale]),
            BOOLEAN => buf.put_u8(blr::BOOL),
            DEC16 => buf.put_u8(blr::DEC64),
            DEC34 => buf.put_u8(blr::DEC128),
            TIME_TZ => buf.put_u8(blr::SQL_TIME_TZ),
            TIMESTAMP_TZ => buf.put_u8(blr::TIMESTAMP_TZ),
            other => return Err(EncodeError::UnsupportedType(other)),
        }
        // null indicator
        buf.put_slice(&[blr::SHORT, 0]);
        Ok(())
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("alias", &self.alias())
            .field("type", &self.sql_type())
            .field("sub_type", &self.sub_type)
            .field("scale", &self.scale)
            .field("length", &self.length)
            .field("nullable", &self.is_nullable())
            .finish()
    }
}

/// Wire layout of a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IoLength {
    /// Length prefixed buffer.
    Varying,
    /// Exactly `n` bytes followed by padding.
    Fixed(usize),
    /// No data, only the null marker.
    Null,
}

/// Ordered field descriptors of a row.
///
/// Cheaply cloneable, rows share the descriptor of their statement.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RowDescriptor {
    fields: Arc<[FieldDescriptor]>,
}

impl RowDescriptor {
    /// Descriptor without any field.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Descriptor of given fields, positions are assigned in order.
    pub fn new(fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(position, field)| FieldDescriptor { position, ..field })
            .collect();
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Position of the field labeled `name`, see [`FieldDescriptor::alias`].
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.alias() == name)
    }

    /// Message BLR describing this row.
    ///
    /// An empty descriptor has an empty BLR.
    pub fn calculate_blr(&self) -> Result<Bytes, EncodeError> {
        if self.fields.is_empty() {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::with_capacity(8 + self.fields.len() * 5);
        buf.put_slice(&[blr::VERSION5, blr::BEGIN, blr::MESSAGE, 0]);
        // value and null indicator per field
        buf.put_u16_le((self.fields.len() * 2).to_u16()?);
        for field in self.fields.iter() {
            field.write_blr(&mut buf)?;
        }
        buf.put_slice(&[blr::END, blr::EOC]);
        Ok(buf.freeze())
    }
}

impl fmt::Debug for RowDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter()).finish()
    }
}

/// One fetched row.
#[derive(Clone)]
pub struct RowValue {
    descriptor: RowDescriptor,
    values: Vec<Option<Bytes>>,
}

impl RowValue {
    pub(crate) fn new(descriptor: RowDescriptor, values: Vec<Option<Bytes>>) -> Self {
        debug_assert_eq!(descriptor.len(), values.len());
        Self { descriptor, values }
    }

    /// Returns `true` if row contains no field.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn descriptor(&self) -> &RowDescriptor {
        &self.descriptor
    }

    /// Raw field data, `None` if field is NULL or out of bounds.
    pub fn get_raw(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Try get and decode field.
    pub fn try_get<I: Index, D: Decode>(&self, index: I) -> Result<D, DecodeError> {
        let position = index.position(&self.descriptor)?;
        let field = &self.descriptor.fields[position];
        D::decode(Column::new(field, self.values[position].clone()))
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }

    /// Iterate fields as [`Column`].
    pub fn columns(&self) -> impl Iterator<Item = Column<'_>> {
        self.descriptor
            .iter()
            .zip(self.values.iter())
            .map(|(field, value)| Column::new(field, value.clone()))
    }
}

impl fmt::Debug for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (field, value) in self.descriptor.iter().zip(self.values.iter()) {
            dbg.key(&field.alias());
            match value {
                None => dbg.value(&format_args!("NULL")),
                Some(value) => dbg.value(&value.lossy()),
            };
        }
        dbg.finish()
    }
}

/// Read one row in the layout of `descriptor`.
pub(crate) async fn read_row(
    stream: &mut WireStream,
    descriptor: &RowDescriptor,
    null_bitmap: bool,
) -> Result<RowValue> {
    let mut values = Vec::with_capacity(descriptor.len());

    if null_bitmap {
        let bitmap = stream.read_fixed(descriptor.len().div_ceil(8)).await?;
        for (i, field) in descriptor.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
                continue;
            }
            values.push(Some(read_value(stream, field).await?));
        }
    } else {
        for field in descriptor.iter() {
            let value = read_value(stream, field).await?;
            let indicator = stream.read_i32().await?;
            values.push((indicator != NULL_INDICATOR).then_some(value));
        }
    }

    Ok(RowValue::new(descriptor.clone(), values))
}

async fn read_value(stream: &mut WireStream, field: &FieldDescriptor) -> Result<Bytes> {
    match field.io_length()? {
        IoLength::Varying => stream.read_buffer().await,
        IoLength::Fixed(len) => stream.read_fixed(len).await,
        IoLength::Null => Ok(Bytes::new()),
    }
}

/// Write one row of encoded field data in the layout of `descriptor`.
pub(crate) fn write_row(
    buf: &mut BytesMut,
    descriptor: &RowDescriptor,
    values: &[Option<Bytes>],
    null_bitmap: bool,
) -> Result<(), EncodeError> {
    if descriptor.len() != values.len() {
        return Err(EncodeError::Count { expected: descriptor.len(), found: values.len() });
    }

    if null_bitmap {
        let mut bitmap = vec![0u8; values.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if value.is_none() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_slice(&bitmap);
        buf.put_bytes(0, padding(bitmap.len()));

        for (field, value) in descriptor.iter().zip(values) {
            if let Some(value) = value {
                write_value(buf, field, Some(value))?;
            }
        }
    } else {
        for (field, value) in descriptor.iter().zip(values) {
            write_value(buf, field, value.as_deref())?;
            buf.put_xdr_i32(match value {
                Some(_) => 0,
                None => NULL_INDICATOR,
            });
        }
    }
    Ok(())
}

fn write_value(buf: &mut BytesMut, field: &FieldDescriptor, value: Option<&[u8]>) -> Result<(), EncodeError> {
    let fill = match field.sql_type() {
        sql_type::TEXT => b' ',
        _ => 0,
    };
    match (field.io_length()?, value) {
        (IoLength::Varying, Some(value)) => buf.put_xdr_buffer(value)?,
        (IoLength::Varying, None) => buf.put_xdr_i32(0),
        (IoLength::Fixed(len), value) => buf.put_xdr_fixed(value.unwrap_or_default(), len, fill),
        (IoLength::Null, _) => {}
    }
    Ok(())
}
