//! The [`Statement`] type.
//!
//! A statement lives through
//!
//! ```text
//! prepare ─▶ execute ─▶ fetch* ─▶ close cursor ─▶ execute ...
//! ```
//!
//! and keeps its server handle until [`Statement::free`] or drop.
use bytes::{Bytes, BytesMut};
use std::{
    fmt,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::sync::Mutex;

use crate::{
    Error, Result,
    common::verbose,
    database::{Channel, DatabaseInner, PendingOp, feature_unsupported},
    exception::{ExceptionBuilder, codes},
    protocol::{
        BackendMessage, Capability, DEFAULT_INFO_SIZE, ExecuteContext, INVALID_OBJECT, ProtocolError,
        buffer::InfoReader, dsql, fetch_status, frontend, info, op,
    },
    row::{Params, RowDescriptor, RowValue, read_row, write_row},
    transaction::Transaction,
};

mod describe;

pub use describe::StatementType;

/// Bit of the cursor flags sent with execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorFlag {
    Scrollable = 1,
}

/// Position requested by [`Statement::fetch_scroll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchType {
    Next = 0,
    Prior = 1,
    First = 2,
    Last = 3,
    Absolute = 4,
    Relative = 5,
}

/// Handle to cancel the next operation of a statement from elsewhere.
///
/// The flag is checked before a request is sent. A set flag fails that operation with
/// `cancelled` and is cleared.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        match self.0.swap(false, Ordering::AcqRel) {
            true => Err(ExceptionBuilder::new().exception(codes::CANCELLED).into_error()),
            false => Ok(()),
        }
    }
}

/// Outcome of [`Statement::execute`].
#[derive(Debug)]
pub struct ExecuteResult {
    pub statement_type: StatementType,
    /// A cursor is open, rows are read with [`Statement::fetch`].
    pub has_cursor: bool,
    /// Row of a statement with singleton result, like `EXECUTE PROCEDURE` or `RETURNING`.
    pub row: Option<RowValue>,
}

#[derive(Debug, Default)]
struct Cursor {
    open: bool,
    fetched: bool,
    all_fetched: bool,
    scrollable: bool,
}

#[derive(Debug, Default)]
struct State {
    handle: Option<i32>,
    transaction: Option<i32>,
    statement_type: StatementType,
    parameters: RowDescriptor,
    parameters_blr: Bytes,
    fields: RowDescriptor,
    fields_blr: Bytes,
    cursor: Cursor,
}

impl State {
    fn handle(&self) -> Result<i32> {
        self.handle
            .ok_or_else(|| ExceptionBuilder::new().exception(codes::STATEMENT_CLOSED).into_error())
    }

    fn ensure_cursor(&self) -> Result<i32> {
        let handle = self.handle()?;
        match self.cursor.open {
            true => Ok(handle),
            false => Err(ExceptionBuilder::new().exception(codes::CURSOR_NOT_OPEN).into_error()),
        }
    }
}

/// A statement allocated on the server.
///
/// Operations on one statement are serialized. Dropping a statement frees it with the next
/// request on the connection.
pub struct Statement {
    db: Arc<DatabaseInner>,
    state: Mutex<State>,
    cursor_flags: StdMutex<u32>,
    timeout_millis: AtomicU32,
    cancel: CancelHandle,
}

impl Statement {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        Self {
            db,
            state: Mutex::default(),
            cursor_flags: StdMutex::new(0),
            timeout_millis: AtomicU32::new(0),
            cancel: CancelHandle::default(),
        }
    }

    /// Server handle, `None` until prepared or after [`Statement::free`].
    pub async fn handle(&self) -> Option<i32> {
        self.state.lock().await.handle
    }

    pub async fn statement_type(&self) -> StatementType {
        self.state.lock().await.statement_type
    }

    /// Descriptor of the parameters.
    pub async fn parameters(&self) -> RowDescriptor {
        self.state.lock().await.parameters.clone()
    }

    /// Descriptor of the output fields.
    pub async fn fields(&self) -> RowDescriptor {
        self.state.lock().await.fields.clone()
    }

    /// Transaction of the last prepare or execute.
    pub async fn transaction(&self) -> Option<i32> {
        self.state.lock().await.transaction
    }

    /// Returns `true` if a cursor is open.
    pub async fn has_cursor(&self) -> bool {
        self.state.lock().await.cursor.open
    }

    /// Returns `true` if the open cursor is scrollable, which requires protocol 18.
    pub async fn is_scrollable(&self) -> bool {
        self.state.lock().await.cursor.scrollable
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Statement timeout, sent with execute from protocol 16, zero disables it.
    pub fn set_timeout(&self, timeout: Duration) {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.timeout_millis.store(millis, Ordering::Release);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis.load(Ordering::Acquire).into())
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, u32> {
        self.cursor_flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set cursor flag, used from the next execute.
    pub fn set_cursor_flag(&self, flag: CursorFlag) {
        *self.flags() |= flag as u32;
    }

    pub fn clear_cursor_flag(&self, flag: CursorFlag) {
        *self.flags() &= !(flag as u32);
    }

    pub fn is_cursor_flag_set(&self, flag: CursorFlag) -> bool {
        *self.flags() & flag as u32 != 0
    }

    /// Allocate if needed and prepare `sql`, describing parameters and fields.
    pub async fn prepare(&self, tx: &Transaction, sql: &str) -> Result<()> {
        verbose!("prepare");
        tx.ensure_active()?;
        let db = &*self.db;
        let mut state = self.state.lock().await;
        let mut ch = db.lock().await?;

        let result = async {
            if let (true, Some(handle)) = (state.cursor.open, state.handle) {
                db.request_lazy(&mut ch, frontend::FreeStatement { statement: handle, option: dsql::CLOSE })
                    .await?;
            }
            state.cursor = Cursor::default();

            let items = describe::describe_items();
            let prepare = |statement| frontend::PrepareStatement {
                transaction: tx.handle(),
                statement,
                dialect: db.config().dialect,
                sql,
                items: &items,
                buffer_len: DEFAULT_INFO_SIZE,
            };

            let current = state.handle;
            let (handle, response) = match current {
                Some(handle) => (handle, db.request(&mut ch, prepare(handle)).await?),
                None if db.supports(Capability::PipelinedPrepare) => {
                    let mark = ch.stream.write_buf().len();
                    ch.send(frontend::AllocateStatement { handle: db.handle() })?;
                    if let Err(err) = ch.send(prepare(INVALID_OBJECT)) {
                        // both or neither
                        ch.stream.write_buf().truncate(mark);
                        return Err(err);
                    }
                    ch.stream.flush().await?;
                    let allocated = db.read_response(&mut ch).await;
                    let prepared = db.read_response(&mut ch).await;
                    let handle = allocated?.handle;
                    state.handle = Some(handle);
                    (handle, prepared?)
                }
                None => {
                    let allocated = db
                        .request(&mut ch, frontend::AllocateStatement { handle: db.handle() })
                        .await?;
                    state.handle = Some(allocated.handle);
                    (allocated.handle, db.request(&mut ch, prepare(allocated.handle)).await?)
                }
            };
            verbose!("prepared statement {handle}");

            let meta = read_describe(db, &mut ch, handle, response.data).await?;
            state.handle = Some(handle);
            state.transaction = Some(tx.handle());
            state.statement_type = meta.statement_type;
            state.parameters = meta.parameters();
            state.parameters_blr = state.parameters.calculate_blr()?;
            state.fields = meta.fields();
            state.fields_blr = state.fields.calculate_blr()?;
            Ok::<_, Error>(())
        }
        .await;
        ch.finish(result)
    }

    /// Execute with `params`, opening a cursor for queries.
    ///
    /// An open cursor is closed first.
    ///
    /// # Errors
    ///
    /// Fails with `parameter_count` if `params` does not match the prepared parameters, or
    /// `cancelled` if the cancel handle was set.
    pub async fn execute(&self, tx: &Transaction, params: &Params) -> Result<ExecuteResult> {
        verbose!("execute");
        tx.ensure_active()?;
        let db = &*self.db;
        let mut state = self.state.lock().await;
        let handle = state.handle()?;

        if params.len() != state.parameters.len() {
            return Err(ExceptionBuilder::new()
                .exception(codes::PARAMETER_COUNT)
                .number_parameter(state.parameters.len() as i64)
                .number_parameter(params.len() as i64)
                .into_error());
        }
        let values = state
            .parameters
            .iter()
            .zip(params.iter())
            .map(|(field, param)| param.encode(field))
            .collect::<Result<Vec<_>, _>>()?;
        let mut message = BytesMut::new();
        write_row(&mut message, &state.parameters, &values, db.null_bitmap())?;

        let cursor_flags = *self.flags();
        let context = ExecuteContext {
            timeout_millis: self.timeout_millis.load(Ordering::Acquire),
            cursor_flags,
            max_inline_blob_size: db.config().max_inline_blob_size,
        };

        self.cancel.check()?;
        let mut ch = db.lock().await?;
        let result = async {
            if state.cursor.open {
                db.request_lazy(&mut ch, frontend::FreeStatement { statement: handle, option: dsql::CLOSE })
                    .await?;
                state.cursor = Cursor::default();
            }

            let state = &mut *state;
            let fields = frontend::ExecuteFields {
                statement: handle,
                transaction: tx.handle(),
                blr: &state.parameters_blr,
                message: (!state.parameters.is_empty()).then_some(&message[..]),
                revision: db.descriptor().revision(),
                context,
            };

            let singleton = state.statement_type == StatementType::ExecProcedure && !state.fields.is_empty();
            let row = match singleton {
                true => {
                    ch.send(frontend::Execute2 { fields, out_blr: &state.fields_blr })?;
                    ch.stream.flush().await?;
                    read_singleton(db, &mut ch, &state.fields).await?
                }
                false => {
                    db.request(&mut ch, frontend::Execute { fields }).await?;
                    None
                }
            };

            let has_cursor = state.statement_type.has_cursor();
            state.transaction = Some(tx.handle());
            state.cursor = Cursor {
                open: has_cursor,
                scrollable: has_cursor
                    && db.supports(Capability::CursorFlags)
                    && cursor_flags & CursorFlag::Scrollable as u32 != 0,
                ..Default::default()
            };
            Ok::<_, Error>(ExecuteResult { statement_type: state.statement_type, has_cursor, row })
        }
        .await;
        ch.finish(result)
    }

    /// Fetch at most `size` rows forward.
    ///
    /// Returns an empty batch once every row is fetched.
    pub async fn fetch(&self, size: i32) -> Result<Vec<RowValue>> {
        verbose!("fetch");
        let db = &*self.db;
        let mut state = self.state.lock().await;
        let handle = state.ensure_cursor()?;
        if state.cursor.all_fetched {
            return Ok(Vec::new());
        }

        self.cancel.check()?;
        let mut ch = db.lock().await?;
        let result = async {
            ch.send(frontend::Fetch { statement: handle, blr: &state.fields_blr, fetch_size: size })?;
            ch.stream.flush().await?;
            let (rows, end) = read_rows(db, &mut ch, &state.fields).await?;
            state.cursor.fetched = true;
            state.cursor.all_fetched = end;
            Ok::<_, Error>(rows)
        }
        .await;
        ch.finish(result)
    }

    /// Fetch from a scrollable position.
    ///
    /// [`FetchType::Next`] and [`FetchType::Prior`] fetch `size` rows, other types one row at
    /// `position`.
    ///
    /// # Errors
    ///
    /// Fails with `feature_unsupported` before protocol 18, without a request.
    pub async fn fetch_scroll(&self, fetch_type: FetchType, size: i32, position: i32) -> Result<Vec<RowValue>> {
        verbose!("fetch_scroll");
        let db = &*self.db;
        if !db.supports(Capability::ScrollFetch) {
            return Err(feature_unsupported("op_fetch_scroll", db.descriptor()));
        }
        let mut state = self.state.lock().await;
        let handle = state.ensure_cursor()?;
        let fetch_size = match fetch_type {
            FetchType::Next | FetchType::Prior => size,
            _ => 1,
        };

        self.cancel.check()?;
        let mut ch = db.lock().await?;
        let result = async {
            ch.send(frontend::FetchScroll {
                statement: handle,
                blr: &state.fields_blr,
                fetch_size,
                fetch_type: fetch_type as i32,
                position,
            })?;
            ch.stream.flush().await?;
            let (rows, end) = read_rows(db, &mut ch, &state.fields).await?;
            state.cursor.fetched = true;
            // moving backward or jumping may find rows again
            state.cursor.all_fetched = end && fetch_type == FetchType::Next;
            Ok::<_, Error>(rows)
        }
        .await;
        ch.finish(result)
    }

    /// Request cursor info `items`, returns the raw info reply.
    ///
    /// # Errors
    ///
    /// Fails with `cursor_not_open` before the first fetch.
    pub async fn cursor_info(&self, items: &[u8]) -> Result<Bytes> {
        let db = &*self.db;
        if !db.supports(Capability::ScrollFetch) {
            return Err(feature_unsupported("op_info_cursor", db.descriptor()));
        }
        let state = self.state.lock().await;
        let handle = state.ensure_cursor()?;
        if !state.cursor.fetched {
            return Err(ExceptionBuilder::new().exception(codes::CURSOR_NOT_OPEN).into_error());
        }
        let response = db
            .roundtrip(frontend::InfoCursor { handle, items, buffer_len: DEFAULT_INFO_SIZE })
            .await?;
        Ok(response.data)
    }

    /// Number of rows of a scrollable cursor, `-1` if not scrollable.
    pub async fn cursor_record_count(&self) -> Result<i64> {
        let data = self.cursor_info(&[info::CURSOR_RECORD_COUNT]).await?;
        let mut reader = InfoReader::new(data);
        while let Some(item) = reader.next_item() {
            match item {
                info::CURSOR_RECORD_COUNT => return Ok(reader.int(item)?),
                _ => {
                    reader.value(item)?;
                }
            }
        }
        Ok(-1)
    }

    /// Close the open cursor, does nothing if none is open.
    pub async fn close_cursor(&self) -> Result<()> {
        let db = &*self.db;
        let mut state = self.state.lock().await;
        let Some(handle) = state.handle.filter(|_| state.cursor.open) else {
            return Ok(());
        };
        state.cursor = Cursor::default();
        db.roundtrip_lazy(frontend::FreeStatement { statement: handle, option: dsql::CLOSE })
            .await
    }

    /// Release the server handle, a later prepare allocates a new one.
    pub async fn free(&self) -> Result<()> {
        let db = &*self.db;
        let mut state = self.state.lock().await;
        let Some(handle) = state.handle.take() else {
            return Ok(());
        };
        *state = State::default();
        db.roundtrip_lazy(frontend::FreeStatement { statement: handle, option: dsql::DROP })
            .await
    }
}

/// Describe info of a prepared statement, continuing a truncated reply.
async fn read_describe(
    db: &DatabaseInner,
    ch: &mut Channel,
    handle: i32,
    data: Bytes,
) -> Result<describe::StatementInfo> {
    let mut meta = describe::StatementInfo::default();
    let mut more = meta.parse(data)?;
    while more {
        let Some(items) = meta.continuation() else {
            break;
        };
        let progress = meta.progress();
        let response = db
            .request(ch, frontend::InfoSql { handle, items: &items, buffer_len: DEFAULT_INFO_SIZE })
            .await?;
        more = meta.parse(response.data)?;
        if more && meta.progress() == progress {
            return Err(ProtocolError::invalid_info(info::TRUNCATED, "describe made no progress").into());
        }
    }
    Ok(meta)
}

/// Read `op_sql_response` with its row followed by the execute response.
async fn read_singleton(db: &DatabaseInner, ch: &mut Channel, fields: &RowDescriptor) -> Result<Option<RowValue>> {
    match db.read_message(ch).await? {
        BackendMessage::Sql(sql) => {
            let row = match sql.count > 0 {
                true => Some(read_row(&mut ch.stream, fields, db.null_bitmap()).await?),
                false => None,
            };
            db.read_response(ch).await?;
            Ok(row)
        }
        BackendMessage::Response(response) => response.into_result().map(|_| None),
        message => Err(ProtocolError::unexpected(op::SQL_RESPONSE, message.operation()).into()),
    }
}

/// Read fetched rows until the batch end, returns the rows and whether every row is fetched.
async fn read_rows(db: &DatabaseInner, ch: &mut Channel, fields: &RowDescriptor) -> Result<(Vec<RowValue>, bool)> {
    let mut rows = Vec::new();
    loop {
        match db.read_message(ch).await? {
            BackendMessage::Fetch(fetch) if fetch.status == fetch_status::OK && fetch.count > 0 => {
                rows.push(read_row(&mut ch.stream, fields, db.null_bitmap()).await?);
            }
            BackendMessage::Fetch(fetch) => {
                verbose!("fetched {} rows, status {}", rows.len(), fetch.status);
                return Ok((rows, fetch.status == fetch_status::NO_MORE_ROWS));
            }
            BackendMessage::Response(response) => {
                response.into_result()?;
                return Ok((rows, false));
            }
            message => {
                return Err(ProtocolError::unexpected(op::FETCH_RESPONSE, message.operation()).into());
            }
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().handle {
            self.db.queue(PendingOp::DropStatement(handle));
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Statement");
        match self.state.try_lock() {
            Ok(state) => dbg
                .field("handle", &state.handle)
                .field("type", &state.statement_type)
                .field("cursor", &state.cursor.open),
            Err(_) => dbg.field("state", &format_args!("<locked>")),
        };
        dbg.finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::{
        Config, Database,
        blob::BlobId,
        database::test::{database, err_response, ok_response, read_ints},
        row::sql_type,
        xdr::XdrBufMut,
    };

    /// Skip what the client sent so far.
    async fn drain(server: &mut DuplexStream) {
        let mut buf = [0; 8192];
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(50), server.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
        }
    }

    /// Describe reply of `SELECT ID, NAME FROM T WHERE ID > ?`.
    fn select_info() -> Vec<u8> {
        let mut buf = BytesMut::new();
        describe::test::statement_type(&mut buf, 1);
        describe::test::section(&mut buf, info::SQL_SELECT, 2);
        describe::test::field(&mut buf, 1, sql_type::LONG, 4, "ID");
        describe::test::field(&mut buf, 2, sql_type::VARYING | 1, 10, "NAME");
        describe::test::section(&mut buf, info::SQL_BIND, 1);
        describe::test::field(&mut buf, 1, sql_type::LONG, 4, "");
        buf.put_u8(info::END);
        buf.to_vec()
    }

    fn fetch_row(buf: &mut BytesMut, id: i32, name: Option<&str>) {
        buf.put_xdr_i32(op::FETCH_RESPONSE);
        buf.put_xdr_i32(fetch_status::OK);
        buf.put_xdr_i32(1);
        // null bitmap
        buf.put_slice(&[if name.is_none() { 0b10 } else { 0 }, 0, 0, 0]);
        buf.put_xdr_i32(id);
        if let Some(name) = name {
            buf.put_xdr_string(name).unwrap();
        }
    }

    fn fetch_end(buf: &mut BytesMut, status: i32) {
        buf.put_xdr_i32(op::FETCH_RESPONSE);
        buf.put_xdr_i32(status);
        buf.put_xdr_i32(0);
    }

    async fn prepared(version: u8) -> (Database, DuplexStream, Transaction, Statement) {
        let (db, mut server) = database(version, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        ok_response(&mut buf, 40, 0, b"");
        ok_response(&mut buf, 0, 0, &select_info());
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let stmt = db.prepare(&tx, "SELECT ID, NAME FROM T WHERE ID > ?").await.unwrap();
        drain(&mut server).await;
        (db, server, tx, stmt)
    }

    #[tokio::test]
    async fn prepare_pipelined() {
        let (_db, _server, _tx, stmt) = prepared(15).await;
        assert_eq!(stmt.handle().await, Some(40));
        assert_eq!(stmt.statement_type().await, StatementType::Select);
        assert_eq!(stmt.fields().await.len(), 2);
        assert_eq!(stmt.parameters().await.len(), 1);
    }

    #[tokio::test]
    async fn prepare_sends_allocate_and_prepare_together() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        server.write_all(&buf).await.unwrap();
        let tx = db.start_transaction().await.unwrap();
        drain(&mut server).await;

        let stmt = db.statement();
        let prepare = tokio::spawn(async move {
            stmt.prepare(&tx, "SELECT 1 FROM RDB$DATABASE").await.map(|_| (stmt, tx))
        });

        // both messages arrive before any response is written
        assert_eq!(read_ints(&mut server, 3).await, [op::ALLOCATE_STATEMENT, 1, op::PREPARE_STATEMENT]);
        assert_eq!(read_ints(&mut server, 2).await, [5, INVALID_OBJECT]);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 41, 0, b"");
        ok_response(&mut buf, 0, 0, &select_info());
        server.write_all(&buf).await.unwrap();
        let (stmt, _tx) = prepare.await.unwrap().unwrap();
        assert_eq!(stmt.handle().await, Some(41));
    }

    #[tokio::test]
    async fn prepare_error_keeps_allocated_handle() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        ok_response(&mut buf, 42, 0, b"");
        err_response(&mut buf, codes::DSQL_RELATION_ERR);
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let stmt = db.statement();
        let err = stmt.prepare(&tx, "SELECT * FROM MISSING").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::DSQL_RELATION_ERR));
        assert!(db.is_valid());
        assert_eq!(stmt.handle().await, Some(42));
    }

    #[tokio::test]
    async fn execute_and_fetch() {
        let (db, mut server, tx, stmt) = prepared(15).await;

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        fetch_row(&mut buf, 1, Some("one"));
        fetch_row(&mut buf, 2, None);
        fetch_end(&mut buf, fetch_status::OK);
        fetch_row(&mut buf, 3, Some("three"));
        fetch_end(&mut buf, fetch_status::NO_MORE_ROWS);
        server.write_all(&buf).await.unwrap();

        let result = stmt.execute(&tx, &Params::new().bind(0)).await.unwrap();
        assert!(result.has_cursor);
        assert!(result.row.is_none());

        let rows = stmt.fetch(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        let (id, name): (i32, Option<String>) = rows[0].clone().decode().unwrap();
        assert_eq!((id, name.as_deref()), (1, Some("one")));
        assert_eq!(rows[1].try_get::<_, Option<String>>(1).unwrap(), None);

        let rows = stmt.fetch(2).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(stmt.fetch(2).await.unwrap().is_empty());
        drop(db);
    }

    #[tokio::test]
    async fn fetch_without_cursor() {
        let (_db, _server, _tx, stmt) = prepared(15).await;
        let err = stmt.fetch(10).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::CURSOR_NOT_OPEN));
    }

    #[tokio::test]
    async fn parameter_count_checked() {
        let (_db, _server, tx, stmt) = prepared(15).await;
        let err = stmt.execute(&tx, &Params::new()).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::PARAMETER_COUNT));
        assert!(err.to_string().contains("expected 1 parameters, received 0"));
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let (db, mut server, tx, stmt) = prepared(15).await;
        stmt.cancel_handle().cancel();

        let err = stmt.execute(&tx, &Params::new().bind(0)).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::CANCELLED));
        assert!(!stmt.cancel_handle().is_cancelled());

        // nothing was sent for the cancelled execute
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(read_ints(&mut server, 1).await, [op::PING]);
    }

    #[tokio::test]
    async fn scroll_requires_protocol_18() {
        let (_db, _server, _tx, stmt) = prepared(17).await;
        let err = stmt.fetch_scroll(FetchType::Last, 10, 0).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::FEATURE_UNSUPPORTED));
        assert!(err.to_string().contains("17"));
        let err = stmt.cursor_info(&[info::CURSOR_RECORD_COUNT]).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::FEATURE_UNSUPPORTED));
    }

    #[tokio::test]
    async fn scroll_fetch_and_record_count() {
        let (_db, mut server, tx, stmt) = prepared(18).await;
        stmt.set_cursor_flag(CursorFlag::Scrollable);
        assert!(stmt.is_cursor_flag_set(CursorFlag::Scrollable));

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        stmt.execute(&tx, &Params::new().bind(0)).await.unwrap();

        // execute tail carries the cursor flags last
        let mut sent = vec![0; 4096];
        let n = server.read(&mut sent).await.unwrap();
        assert_eq!(&sent[n - 4..n], &1u32.to_be_bytes());

        let err = stmt.cursor_record_count().await.unwrap_err();
        assert_eq!(err.code(), Some(codes::CURSOR_NOT_OPEN));

        let mut buf = BytesMut::new();
        fetch_row(&mut buf, 9, Some("last"));
        fetch_end(&mut buf, fetch_status::OK);
        let mut reply = vec![info::CURSOR_RECORD_COUNT, 4, 0];
        reply.extend_from_slice(&9i32.to_le_bytes());
        reply.push(info::END);
        ok_response(&mut buf, 0, 0, &reply);
        server.write_all(&buf).await.unwrap();

        let rows = stmt.fetch_scroll(FetchType::Last, 10, 0).await.unwrap();
        assert_eq!(rows[0].try_get::<_, i32>(0).unwrap(), 9);
        assert!(stmt.is_scrollable().await);
        let blr_len = stmt.fields().await.calculate_blr().unwrap().len() as i32;
        assert_eq!(read_ints(&mut server, 3).await, [op::FETCH_SCROLL, 40, blr_len]);
        assert_eq!(stmt.cursor_record_count().await.unwrap(), 9);

        stmt.clear_cursor_flag(CursorFlag::Scrollable);
        assert!(!stmt.is_cursor_flag_set(CursorFlag::Scrollable));
    }

    #[tokio::test]
    async fn singleton_result() {
        let (db, mut server) = database(15, Config::default());
        let mut reply = BytesMut::new();
        describe::test::statement_type(&mut reply, 8);
        describe::test::section(&mut reply, info::SQL_SELECT, 1);
        describe::test::field(&mut reply, 1, sql_type::BLOB, 8, "DOC");
        describe::test::section(&mut reply, info::SQL_BIND, 0);
        reply.put_u8(info::END);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        ok_response(&mut buf, 43, 0, b"");
        ok_response(&mut buf, 0, 0, &reply);
        buf.put_xdr_i32(op::SQL_RESPONSE);
        buf.put_xdr_i32(1);
        buf.put_slice(&[0, 0, 0, 0]);
        buf.put_xdr_i64(77);
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let stmt = db.prepare(&tx, "INSERT INTO T(DOC) VALUES ('x') RETURNING DOC").await.unwrap();
        let result = stmt.execute(&tx, &Params::new()).await.unwrap();
        assert_eq!(result.statement_type, StatementType::ExecProcedure);
        assert!(!result.has_cursor);
        let row = result.row.unwrap();
        assert_eq!(row.try_get::<_, BlobId>(0).unwrap(), BlobId(77));
    }

    #[tokio::test]
    async fn truncated_describe_continued() {
        let (db, mut server) = database(15, Config::default());
        let mut first = BytesMut::new();
        describe::test::statement_type(&mut first, 1);
        describe::test::section(&mut first, info::SQL_SELECT, 2);
        describe::test::field(&mut first, 1, sql_type::LONG, 4, "A");
        first.put_u8(info::TRUNCATED);

        let mut rest = BytesMut::new();
        describe::test::section(&mut rest, info::SQL_SELECT, 2);
        describe::test::field(&mut rest, 2, sql_type::LONG, 4, "B");
        rest.put_u8(info::END);

        let mut bind = BytesMut::new();
        describe::test::section(&mut bind, info::SQL_BIND, 0);
        bind.put_u8(info::END);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        ok_response(&mut buf, 44, 0, b"");
        ok_response(&mut buf, 0, 0, &first);
        ok_response(&mut buf, 0, 0, &rest);
        ok_response(&mut buf, 0, 0, &bind);
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let stmt = db.prepare(&tx, "SELECT A, B FROM T").await.unwrap();
        let aliases: Vec<_> = stmt.fields().await.iter().map(|f| f.alias().to_owned()).collect();
        assert_eq!(aliases, ["A", "B"]);
    }

    #[tokio::test]
    async fn describe_without_progress_fails() {
        let (db, mut server) = database(15, Config::default());
        let mut first = BytesMut::new();
        describe::test::section(&mut first, info::SQL_SELECT, 2);
        first.put_u8(info::TRUNCATED);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 5, 0, b"");
        ok_response(&mut buf, 44, 0, b"");
        ok_response(&mut buf, 0, 0, &first);
        ok_response(&mut buf, 0, 0, &first);
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let err = db.prepare(&tx, "SELECT A, B FROM T").await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Protocol(_)));
    }

    #[tokio::test]
    async fn dropped_statement_freed_with_next_request() {
        let (db, mut server, _tx, stmt) = prepared(15).await;
        drop(stmt);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(read_ints(&mut server, 4).await, [op::FREE_STATEMENT, 40, dsql::DROP, op::PING]);
    }

    #[tokio::test]
    async fn free_then_execute() {
        let (db, mut server, tx, stmt) = prepared(15).await;
        stmt.free().await.unwrap();
        assert_eq!(stmt.handle().await, None);
        let err = stmt.execute(&tx, &Params::new().bind(0)).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::STATEMENT_CLOSED));

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(read_ints(&mut server, 4).await, [op::FREE_STATEMENT, 40, dsql::DROP, op::PING]);
    }
}
