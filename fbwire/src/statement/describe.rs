//! Statement describe info.
//!
//! Prepare requests the statement type and both field lists in one info buffer. A reply that
//! does not fit ends with `isc_info_truncated`, the rest is requested from the first missing
//! field with `isc_info_sql_sqlda_start`.
use bytes::Bytes;

use crate::{
    protocol::{ProtocolError, buffer::InfoReader, info},
    row::{FieldDescriptor, RowDescriptor},
};

/// Items describing the output fields.
const SELECT_ITEMS: [u8; 12] = [
    info::SQL_SELECT,
    info::SQL_DESCRIBE_VARS,
    info::SQL_SQLDA_SEQ,
    info::SQL_TYPE,
    info::SQL_SUB_TYPE,
    info::SQL_SCALE,
    info::SQL_LENGTH,
    info::SQL_FIELD,
    info::SQL_ALIAS,
    info::SQL_RELATION,
    info::SQL_OWNER,
    info::SQL_DESCRIBE_END,
];

/// Items describing the parameters.
const BIND_ITEMS: [u8; 8] = [
    info::SQL_BIND,
    info::SQL_DESCRIBE_VARS,
    info::SQL_SQLDA_SEQ,
    info::SQL_TYPE,
    info::SQL_SUB_TYPE,
    info::SQL_SCALE,
    info::SQL_LENGTH,
    info::SQL_DESCRIBE_END,
];

/// Items requested with prepare.
pub(crate) fn describe_items() -> Vec<u8> {
    let mut items = Vec::with_capacity(1 + SELECT_ITEMS.len() + BIND_ITEMS.len());
    items.push(info::SQL_STMT_TYPE);
    items.extend_from_slice(&SELECT_ITEMS);
    items.extend_from_slice(&BIND_ITEMS);
    items
}

/// Kind of a prepared statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatementType {
    #[default]
    None,
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    GetSegment,
    PutSegment,
    /// Procedure call, also statements with `RETURNING`.
    ExecProcedure,
    StartTransaction,
    Commit,
    Rollback,
    SelectForUpdate,
    SetGenerator,
    Savepoint,
    Unknown(i32),
}

impl StatementType {
    fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Select,
            2 => Self::Insert,
            3 => Self::Update,
            4 => Self::Delete,
            5 => Self::Ddl,
            6 => Self::GetSegment,
            7 => Self::PutSegment,
            8 => Self::ExecProcedure,
            9 => Self::StartTransaction,
            10 => Self::Commit,
            11 => Self::Rollback,
            12 => Self::SelectForUpdate,
            13 => Self::SetGenerator,
            14 => Self::Savepoint,
            code => Self::Unknown(code),
        }
    }

    /// Returns `true` if execute opens a cursor.
    pub fn has_cursor(self) -> bool {
        matches!(self, Self::Select | Self::SelectForUpdate)
    }

    /// Returns `true` for statements handled as transaction control by the server.
    pub fn is_transaction_control(self) -> bool {
        matches!(self, Self::StartTransaction | Self::Commit | Self::Rollback)
    }
}

/// Field list being described.
#[derive(Debug, Default)]
pub(crate) struct Section {
    count: Option<usize>,
    fields: Vec<FieldDescriptor>,
}

impl Section {
    fn is_complete(&self) -> bool {
        self.count.is_some_and(|count| self.fields.len() >= count)
    }

    fn descriptor(&self) -> RowDescriptor {
        RowDescriptor::new(self.fields.iter().cloned())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Current {
    None,
    Select,
    Bind,
}

/// Describe info accumulated over one or more info replies.
#[derive(Debug, Default)]
pub(crate) struct StatementInfo {
    pub(crate) statement_type: StatementType,
    select: Section,
    bind: Section,
}

impl StatementInfo {
    /// Number of fields described so far, in both sections.
    pub(crate) fn progress(&self) -> usize {
        self.select.fields.len() + self.bind.fields.len()
    }

    /// Output fields.
    pub(crate) fn fields(&self) -> RowDescriptor {
        self.select.descriptor()
    }

    /// Parameters.
    pub(crate) fn parameters(&self) -> RowDescriptor {
        self.bind.descriptor()
    }

    /// Merge an info reply, returns `true` if more is to be requested.
    pub(crate) fn parse(&mut self, data: Bytes) -> Result<bool, ProtocolError> {
        let mut reader = InfoReader::new(data);
        let mut current = Current::None;
        let mut field: Option<FieldDescriptor> = None;

        while let Some(item) = reader.next_item() {
            let section = match current {
                Current::Select => Some(&mut self.select),
                Current::Bind => Some(&mut self.bind),
                Current::None => None,
            };

            match (item, section) {
                (info::TRUNCATED, _) => return Ok(true),
                (info::SQL_STMT_TYPE, _) => {
                    self.statement_type = StatementType::from_code(reader.int32(item)?);
                }
                (info::SQL_SELECT, _) => current = Current::Select,
                (info::SQL_BIND, _) => current = Current::Bind,
                (info::SQL_DESCRIBE_VARS, Some(section)) => {
                    let count = reader.int32(item)?;
                    let count = usize::try_from(count)
                        .map_err(|_| ProtocolError::invalid_info(item, "negative field count"))?;
                    section.count = Some(count);
                    section.fields.reserve(count.saturating_sub(section.fields.len()));
                }
                (info::SQL_SQLDA_SEQ, Some(section)) => {
                    let index = reader.int32(item)?;
                    let position = usize::try_from(index - 1)
                        .map_err(|_| ProtocolError::invalid_info(item, "field index out of range"))?;
                    if position > section.fields.len() {
                        return Err(ProtocolError::invalid_info(item, "field index skips a field"));
                    }
                    // a continuation repeats from the first incomplete field
                    section.fields.truncate(position);
                    field = Some(FieldDescriptor { position, ..Default::default() });
                }
                (info::SQL_DESCRIBE_END, Some(section)) => {
                    if let Some(field) = field.take() {
                        section.fields.push(field);
                    }
                }
                (item, _) => match field.as_mut() {
                    Some(field) => read_field_item(&mut reader, item, field)?,
                    None => {
                        reader.value(item)?;
                    }
                },
            }
        }

        Ok(!(self.select.is_complete() && self.bind.is_complete()))
    }

    /// Items requesting the rest of the first incomplete section.
    pub(crate) fn continuation(&self) -> Option<Vec<u8>> {
        let (section, items) = match (self.select.is_complete(), self.bind.is_complete()) {
            (false, _) => (&self.select, &SELECT_ITEMS[..]),
            (true, false) => (&self.bind, &BIND_ITEMS[..]),
            (true, true) => return None,
        };
        let index = u16::try_from(section.fields.len() + 1).unwrap_or(u16::MAX);
        let mut request = Vec::with_capacity(4 + items.len());
        request.extend_from_slice(&[info::SQL_SQLDA_START, 2]);
        request.extend_from_slice(&index.to_le_bytes());
        request.extend_from_slice(items);
        Some(request)
    }
}

fn read_field_item(reader: &mut InfoReader, item: u8, field: &mut FieldDescriptor) -> Result<(), ProtocolError> {
    match item {
        info::SQL_TYPE => field.sql_type = reader.int32(item)?,
        info::SQL_SUB_TYPE => field.sub_type = reader.int32(item)?,
        info::SQL_SCALE => field.scale = reader.int32(item)?,
        info::SQL_LENGTH => field.length = reader.int32(item)?,
        info::SQL_FIELD => field.field_name = string(reader.value(item)?),
        info::SQL_RELATION => field.relation_name = string(reader.value(item)?),
        info::SQL_OWNER => field.owner_name = string(reader.value(item)?),
        info::SQL_ALIAS => field.alias = string(reader.value(item)?),
        _ => {
            reader.value(item)?;
        }
    }
    Ok(())
}

fn string(value: Bytes) -> String {
    String::from_utf8_lossy(&value).into_owned()
}

#[cfg(test)]
pub(crate) mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::row::sql_type;

    fn int(buf: &mut BytesMut, item: u8, value: i32) {
        buf.put_u8(item);
        buf.put_u16_le(4);
        buf.put_i32_le(value);
    }

    fn string(buf: &mut BytesMut, item: u8, value: &str) {
        buf.put_u8(item);
        buf.put_u16_le(value.len() as u16);
        buf.put_slice(value.as_bytes());
    }

    /// Describe one field of a section.
    pub(crate) fn field(buf: &mut BytesMut, index: i32, sql_type: i32, length: i32, alias: &str) {
        int(buf, info::SQL_SQLDA_SEQ, index);
        int(buf, info::SQL_TYPE, sql_type);
        int(buf, info::SQL_SUB_TYPE, 0);
        int(buf, info::SQL_SCALE, 0);
        int(buf, info::SQL_LENGTH, length);
        if !alias.is_empty() {
            string(buf, info::SQL_FIELD, alias);
            string(buf, info::SQL_ALIAS, alias);
        }
        buf.put_u8(info::SQL_DESCRIBE_END);
    }

    pub(crate) fn statement_type(buf: &mut BytesMut, code: i32) {
        int(buf, info::SQL_STMT_TYPE, code);
    }

    pub(crate) fn section(buf: &mut BytesMut, section: u8, count: i32) {
        buf.put_u8(section);
        int(buf, info::SQL_DESCRIBE_VARS, count);
    }

    #[test]
    fn complete_reply() {
        let mut buf = BytesMut::new();
        statement_type(&mut buf, 1);
        section(&mut buf, info::SQL_SELECT, 2);
        field(&mut buf, 1, sql_type::LONG | 1, 4, "ID");
        field(&mut buf, 2, sql_type::VARYING, 10, "NAME");
        section(&mut buf, info::SQL_BIND, 1);
        field(&mut buf, 1, sql_type::LONG, 4, "");
        buf.put_u8(info::END);

        let mut meta = StatementInfo::default();
        assert!(!meta.parse(buf.freeze()).unwrap());
        assert_eq!(meta.statement_type, StatementType::Select);
        assert!(meta.statement_type.has_cursor());

        let fields = meta.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get(1).unwrap().alias(), "NAME");
        assert_eq!(fields.get(1).unwrap().sql_type(), sql_type::VARYING);
        assert!(fields.get(0).unwrap().is_nullable());
        assert_eq!(meta.parameters().len(), 1);
        assert!(meta.continuation().is_none());
    }

    #[test]
    fn truncated_reply_continues() {
        let mut buf = BytesMut::new();
        statement_type(&mut buf, 1);
        section(&mut buf, info::SQL_SELECT, 3);
        field(&mut buf, 1, sql_type::LONG, 4, "A");
        int(&mut buf, info::SQL_SQLDA_SEQ, 2);
        int(&mut buf, info::SQL_TYPE, sql_type::LONG);
        buf.put_u8(info::TRUNCATED);

        let mut meta = StatementInfo::default();
        assert!(meta.parse(buf.freeze()).unwrap());
        assert_eq!(meta.progress(), 1);

        let request = meta.continuation().unwrap();
        assert_eq!(&request[..4], &[info::SQL_SQLDA_START, 2, 2, 0]);
        assert_eq!(&request[4..], &SELECT_ITEMS);

        let mut buf = BytesMut::new();
        section(&mut buf, info::SQL_SELECT, 3);
        field(&mut buf, 2, sql_type::LONG, 4, "B");
        field(&mut buf, 3, sql_type::LONG, 4, "C");
        buf.put_u8(info::END);
        assert!(meta.parse(buf.freeze()).unwrap());

        // bind section never described
        let request = meta.continuation().unwrap();
        assert_eq!(&request[..4], &[info::SQL_SQLDA_START, 2, 1, 0]);
        assert_eq!(request[4], info::SQL_BIND);

        let mut buf = BytesMut::new();
        section(&mut buf, info::SQL_BIND, 0);
        buf.put_u8(info::END);
        assert!(!meta.parse(buf.freeze()).unwrap());

        let aliases: Vec<_> = meta.fields().iter().map(|f| f.alias().to_owned()).collect();
        assert_eq!(aliases, ["A", "B", "C"]);
        assert_eq!(meta.fields().get(2).unwrap().position(), 2);
    }

    #[test]
    fn index_gap_rejected() {
        let mut buf = BytesMut::new();
        section(&mut buf, info::SQL_SELECT, 3);
        field(&mut buf, 2, sql_type::LONG, 4, "B");
        assert!(StatementInfo::default().parse(buf.freeze()).is_err());
    }

    #[test]
    fn statement_types() {
        assert_eq!(StatementType::from_code(8), StatementType::ExecProcedure);
        assert_eq!(StatementType::from_code(99), StatementType::Unknown(99));
        assert!(StatementType::SelectForUpdate.has_cursor());
        assert!(!StatementType::ExecProcedure.has_cursor());
        assert!(StatementType::Commit.is_transaction_control());
    }
}
