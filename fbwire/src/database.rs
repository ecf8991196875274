//! The [`Database`] type.
use bytes::{Bytes, BytesMut};
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
};
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};

use crate::{
    Config, Error, Result,
    auth::{ClientAuthBlock, legacy_hash},
    blob::{BlobId, InlineBlob, InlineBlobCache, InputBlob, OutputBlob, RemoteBlob},
    common::{error, verbose},
    connection::{Connection, auth_receive_response},
    event::{self, EventChannel, EventHandle},
    exception::{ExceptionBuilder, codes},
    net::Socket,
    protocol::{
        BackendMessage, Capability, DEFAULT_INFO_SIZE, FrontendProtocol, ProtocolDescriptor,
        ProtocolError, backend::{InlineBlobPacket, Response}, buffer::ParameterBuffer, dpb, dsql,
        frontend, op, tpb,
    },
    statement::Statement,
    stream::{SharedWriter, WireStream},
    transaction::Transaction,
};

/// Kind of `op_cancel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelKind {
    /// Ignore cancel requests until enabled.
    Disable = 1,
    /// Accept cancel requests again.
    Enable = 2,
    /// Cancel the running operation.
    Raise = 3,
    /// Abort the attachment.
    Abort = 4,
}

/// Operation queued by a dropped handle, written before the next request.
#[derive(Debug)]
pub(crate) enum PendingOp {
    Rollback(i32),
    DropStatement(i32),
    CloseBlob(i32),
    CancelBlob(i32),
}

/// Request and response side of the connection.
///
/// Only one request is in flight at a time, holding the channel lock for the whole exchange
/// keeps the wire framing intact.
pub(crate) struct Channel {
    pub(crate) stream: WireStream,
    /// Responses of buffered messages not read yet.
    deferred: usize,
    auth: Option<ClientAuthBlock>,
}

impl Channel {
    pub(crate) fn send<F: FrontendProtocol>(&mut self, message: F) -> Result<()> {
        self.stream.send(message)
    }

    /// Buffer a message, its response is read before the response of the next request.
    pub(crate) fn send_deferred<F: FrontendProtocol>(&mut self, message: F) -> Result<()> {
        self.stream.send(message)?;
        self.deferred += 1;
        Ok(())
    }
}

/// Exclusive access to the channel for one exchange.
///
/// Dropping the guard before [`ChannelGuard::finish`], as when the caller future is cancelled
/// between a request and its response, invalidates the connection.
pub(crate) struct ChannelGuard<'a> {
    inner: &'a DatabaseInner,
    channel: MutexGuard<'a, Channel>,
    finished: bool,
}

impl ChannelGuard<'_> {
    /// End the exchange, invalidating the connection if `result` is a fatal error.
    pub(crate) fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.finished = true;
        self.inner.check(result)
    }
}

impl Deref for ChannelGuard<'_> {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl DerefMut for ChannelGuard<'_> {
    fn deref_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let err = ExceptionBuilder::new()
                .exception(codes::CANCELLED)
                .message_parameter("exchange abandoned before its response")
                .into_error();
            self.inner.invalidate(&err);
        }
    }
}

pub(crate) struct DatabaseInner {
    channel: Mutex<Channel>,
    writer: SharedWriter,
    descriptor: ProtocolDescriptor,
    handle: AtomicI32,
    attached: AtomicBool,
    detached: AtomicBool,
    valid: AtomicBool,
    invalid_reason: StdMutex<String>,
    pending: StdMutex<Vec<PendingOp>>,
    events: Mutex<Option<EventChannel>>,
    cache: InlineBlobCache,
    config: Config,
}

impl DatabaseInner {
    pub(crate) fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    pub(crate) fn supports(&self, capability: Capability) -> bool {
        self.descriptor.supports(capability)
    }

    pub(crate) fn handle(&self) -> i32 {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn cache(&self) -> &InlineBlobCache {
        &self.cache
    }

    /// Rows carry a null bitmap.
    pub(crate) fn null_bitmap(&self) -> bool {
        self.supports(Capability::NullBitmap)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.detached.load(Ordering::Acquire) {
            return Err(ExceptionBuilder::new().exception(codes::BAD_DB_HANDLE).into_error());
        }
        if !self.valid.load(Ordering::Acquire) {
            let reason = self.invalid_reason.lock().unwrap_or_else(PoisonError::into_inner).clone();
            return Err(ExceptionBuilder::new()
                .non_transient_connect(codes::CONNECTION_INVALID)
                .message_parameter(reason)
                .into_error());
        }
        Ok(())
    }

    /// Acquire the channel, pending operations of dropped handles are written first.
    ///
    /// The exchange must end with [`ChannelGuard::finish`].
    ///
    /// # Errors
    ///
    /// Fails with `bad_db_handle` after detach and `connection_invalid` after a fatal error.
    pub(crate) async fn lock(&self) -> Result<ChannelGuard<'_>> {
        self.ensure_usable()?;
        let channel = self.channel.lock().await;
        self.ensure_usable()?;
        let mut channel = ChannelGuard { inner: self, channel, finished: false };

        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        for op in pending {
            verbose!("writing pending {op:?}");
            let sent = match op {
                PendingOp::Rollback(handle) => channel.send_deferred(frontend::Rollback { handle }),
                PendingOp::DropStatement(statement) => {
                    channel.send_deferred(frontend::FreeStatement { statement, option: dsql::DROP })
                }
                PendingOp::CloseBlob(handle) => channel.send_deferred(frontend::CloseBlob { handle }),
                PendingOp::CancelBlob(handle) => channel.send_deferred(frontend::CancelBlob { handle }),
            };
            if let Err(err) = sent {
                return channel.finish(Err(err));
            }
        }
        Ok(channel)
    }

    /// Queue an operation for the next request, dropped once the connection is closed.
    pub(crate) fn queue(&self, op: PendingOp) {
        if self.detached.load(Ordering::Acquire) || !self.valid.load(Ordering::Acquire) {
            return;
        }
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(op);
    }

    /// Invalidate the connection if `result` is a fatal error.
    pub(crate) fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() || self.config.fatal_errors.is_fatal(err) {
                self.invalidate(err);
            }
        }
        result
    }

    fn invalidate(&self, err: &Error) {
        if self.valid.swap(false, Ordering::AcqRel) {
            error!("connection invalidated by fatal error: {err}");
            let reason = match err.code() {
                Some(code) => itoa::Buffer::new().format(code).to_owned(),
                None => err.to_string(),
            };
            *self.invalid_reason.lock().unwrap_or_else(PoisonError::into_inner) = reason;
        }
    }

    fn add_inline_blob(&self, packet: InlineBlobPacket) -> Result<()> {
        let blob = InlineBlob::from_packet(packet)?;
        let transaction = blob.transaction();
        if !self.cache.add(transaction, blob)? {
            verbose!("inline blob not cached");
        }
        Ok(())
    }

    async fn drain_deferred(&self, ch: &mut Channel) -> Result<()> {
        while ch.deferred > 0 {
            ch.deferred -= 1;
            match BackendMessage::read(&mut ch.stream).await? {
                BackendMessage::Response(response) => {
                    if let Some(_err) = response.status {
                        error!("deferred operation failed: {_err}");
                    }
                }
                message => {
                    return Err(ProtocolError::unexpected_phase(message.operation(), "deferred response").into());
                }
            }
        }
        Ok(())
    }

    /// Read the next message, deferred responses and inline blobs are consumed first.
    pub(crate) async fn read_message(&self, ch: &mut Channel) -> Result<BackendMessage> {
        self.drain_deferred(ch).await?;
        loop {
            match BackendMessage::read(&mut ch.stream).await? {
                BackendMessage::InlineBlob(packet) => self.add_inline_blob(packet)?,
                message => return Ok(message),
            }
        }
    }

    /// Read `op_response`, failing with its status if any.
    pub(crate) async fn read_response(&self, ch: &mut Channel) -> Result<Response> {
        match self.read_message(ch).await? {
            BackendMessage::Response(response) => response.into_result(),
            message => Err(ProtocolError::unexpected(op::RESPONSE, message.operation()).into()),
        }
    }

    /// Send `message` and read its response.
    pub(crate) async fn request<F: FrontendProtocol>(&self, ch: &mut Channel, message: F) -> Result<Response> {
        ch.send(message)?;
        ch.stream.flush().await?;
        self.read_response(ch).await
    }

    /// Send `message`, deferring its response on lazy send protocols.
    pub(crate) async fn request_lazy<F: FrontendProtocol>(&self, ch: &mut Channel, message: F) -> Result<()> {
        if self.supports(Capability::LazySend) {
            return ch.send_deferred(message);
        }
        self.request(ch, message).await.map(drop)
    }

    /// Lock the channel, send `message` and read its response.
    pub(crate) async fn roundtrip<F: FrontendProtocol>(&self, message: F) -> Result<Response> {
        let mut ch = self.lock().await?;
        let result = self.request(&mut ch, message).await;
        ch.finish(result)
    }

    /// Lock the channel and send `message`, see [`DatabaseInner::request_lazy`].
    pub(crate) async fn roundtrip_lazy<F: FrontendProtocol>(&self, message: F) -> Result<()> {
        let mut ch = self.lock().await?;
        let result = self.request_lazy(&mut ch, message).await;
        ch.finish(result)
    }

    /// Ask for the auxiliary port and connect to it on the host of the main connection.
    async fn open_event_channel(&self) -> Result<EventChannel> {
        let response = self.roundtrip(frontend::ConnectRequest { database: self.handle() }).await?;
        let port = event::aux_port(&response.data)?;
        verbose!("event connection to {}:{port}", self.config.host);
        let socket = Socket::connect_tcp(&self.config.host, port, self.config.connect_timeout).await?;
        Ok(EventChannel::start(WireStream::new(socket, None), response.handle))
    }

    fn dpb(&self, auth: Option<&mut ClientAuthBlock>) -> Result<ParameterBuffer> {
        let config = &self.config;
        let mut dpb = match self.supports(Capability::AuthPlugins) {
            true => ParameterBuffer::upgradable(dpb::VERSION1, dpb::VERSION2),
            false => ParameterBuffer::new(dpb::VERSION1),
        };
        dpb.string(dpb::LC_CTYPE, &config.charset)?
            .int(dpb::SQL_DIALECT, config.dialect)
            .int(dpb::PROCESS_ID, std::process::id() as i32);

        if let Some(name) = std::env::args().next() {
            dpb.string(dpb::PROCESS_NAME, &name)?;
        }
        if !config.user.is_empty() {
            dpb.string(dpb::USER_NAME, &config.user)?;
        }
        if let Some(timeout) = config.connect_timeout {
            dpb.int(dpb::CONNECT_TIMEOUT, i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX));
        }
        if let Some(role) = &config.role {
            dpb.string(dpb::SQL_ROLE_NAME, role)?;
        }

        match auth {
            Some(auth) if self.supports(Capability::AuthPlugins) => {
                if !auth.is_auth_complete() {
                    auth.fill_dpb(&mut dpb)?;
                }
            }
            _ => {
                if !config.password.is_empty() {
                    dpb.bytes(dpb::PASSWORD_ENC, &legacy_hash(&config.password))?;
                }
            }
        }
        Ok(dpb)
    }
}

/// An attached Firebird database.
///
/// The handle is cheaply cloneable, clones share the same connection. Operations on one
/// connection are serialized.
///
/// # Example
///
/// ```no_run
/// # async fn app() -> fbwire::Result<()> {
/// use fbwire::{Database, Params};
///
/// let db = Database::connect_env().await?;
/// let mut tx = db.start_transaction().await?;
///
/// let stmt = db.prepare(&tx, "SELECT 1 FROM RDB$DATABASE WHERE 1 = ?").await?;
/// stmt.execute(&tx, &Params::new().bind(1)).await?;
/// for row in stmt.fetch(100).await? {
///     let (one,): (i32,) = row.decode()?;
///     assert_eq!(one, 1);
/// }
///
/// tx.commit().await?;
/// db.detach().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Connect, negotiate the protocol and attach using `config`.
    pub async fn connect(config: Config) -> Result<Database> {
        let db = Connection::connect(config).await?.identify().await?;
        db.attach().await?;
        Ok(db)
    }

    /// Connect using [`Config::from_env`].
    pub async fn connect_env() -> Result<Database> {
        Self::connect(Config::from_env()).await
    }

    /// Database bound to a negotiated connection, not attached yet.
    pub(crate) fn new(
        stream: WireStream,
        descriptor: ProtocolDescriptor,
        auth: Option<ClientAuthBlock>,
        config: Config,
    ) -> Database {
        let writer = stream.shared_writer();
        let cache = InlineBlobCache::new(config.max_inline_blob_size, config.max_blob_cache_size);
        Database {
            inner: Arc::new(DatabaseInner {
                channel: Mutex::new(Channel { stream, deferred: 0, auth }),
                writer,
                descriptor,
                handle: AtomicI32::new(0),
                attached: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                valid: AtomicBool::new(true),
                invalid_reason: StdMutex::default(),
                pending: StdMutex::default(),
                events: Mutex::new(None),
                cache,
                config,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DatabaseInner> {
        &self.inner
    }

    /// Negotiated protocol.
    pub fn protocol(&self) -> &ProtocolDescriptor {
        &self.inner.descriptor
    }

    /// Server handle of the attachment.
    pub fn handle(&self) -> i32 {
        self.inner.handle()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Inline blobs received and not opened yet.
    pub fn blob_cache(&self) -> &InlineBlobCache {
        &self.inner.cache
    }

    /// Returns `true` unless detached or invalidated by a fatal error.
    pub fn is_valid(&self) -> bool {
        !self.inner.detached.load(Ordering::Acquire) && self.inner.valid.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire) && !self.inner.detached.load(Ordering::Acquire)
    }

    /// Attach to the configured database.
    ///
    /// From protocol 13 the server may continue the authentication exchange before answering.
    pub async fn attach(&self) -> Result<()> {
        verbose!("attach");
        let inner = &*self.inner;
        let mut guard = inner.lock().await?;
        let result = async {
            let ch = &mut *guard;
            let mut auth = ch.auth.take();
            let dpb = inner.dpb(auth.as_mut())?;
            ch.send(frontend::Attach { database: &inner.config.database, dpb: dpb.as_bytes() })?;
            ch.stream.flush().await?;

            let response = match auth.as_mut() {
                Some(auth) if inner.supports(Capability::AuthPlugins) => {
                    inner.drain_deferred(ch).await?;
                    auth_receive_response(&mut ch.stream, auth, None).await?
                }
                _ => inner.read_response(ch).await?,
            };

            verbose!("attached with handle {}", response.handle);
            inner.handle.store(response.handle, Ordering::Release);
            inner.attached.store(true, Ordering::Release);
            Ok::<_, Error>(())
        }
        .await;
        guard.finish(result)
    }

    /// Detach and close the connection.
    ///
    /// Calling detach again does nothing. Any other operation afterwards fails with
    /// `bad_db_handle`.
    pub async fn detach(&self) -> Result<()> {
        verbose!("detach");
        let inner = &*self.inner;
        if inner.detached.load(Ordering::Acquire) {
            return Ok(());
        }

        drop(inner.events.lock().await.take());
        let mut ch = inner.channel.lock().await;
        if inner.detached.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();

        let result = match inner.valid.load(Ordering::Acquire) {
            true => {
                async {
                    if inner.attached.load(Ordering::Acquire) {
                        inner.request(&mut ch, frontend::Detach { handle: inner.handle() }).await?;
                    }
                    ch.send(frontend::Disconnect)?;
                    ch.stream.flush().await
                }
                .await
            }
            false => Ok(()),
        };

        inner.cache.close();
        if let Err(_err) = ch.stream.shutdown().await {
            verbose!("socket shutdown failed: {_err}");
        }
        result
    }

    /// Start transaction with the default parameters: read committed, read write, wait.
    pub async fn start_transaction(&self) -> Result<Transaction> {
        let mut tpb = ParameterBuffer::new(tpb::VERSION3);
        tpb.flag(tpb::WRITE)
            .flag(tpb::WAIT)
            .flag(tpb::READ_COMMITTED)
            .flag(tpb::REC_VERSION);
        self.start_transaction_with(tpb.as_bytes()).await
    }

    /// Start transaction with the given transaction parameter buffer.
    pub async fn start_transaction_with(&self, tpb: &[u8]) -> Result<Transaction> {
        let inner = &self.inner;
        let response = inner
            .roundtrip(frontend::StartTransaction { database: inner.handle(), tpb })
            .await?;
        inner.cache.register_transaction(response.handle);
        verbose!("started transaction {}", response.handle);
        Ok(Transaction::new(inner.clone(), response.handle))
    }

    /// Execute a statement without preparing it, no result is returned.
    pub async fn execute_immediate(&self, tx: &Transaction, sql: &str) -> Result<()> {
        tx.ensure_active()?;
        let inner = &self.inner;
        inner
            .roundtrip(frontend::ExecImmediate {
                transaction: tx.handle(),
                database: inner.handle(),
                dialect: inner.config.dialect,
                sql,
                items: &[],
                buffer_len: 0,
            })
            .await?;
        Ok(())
    }

    /// Statement without server handle, see [`Statement::prepare`].
    pub fn statement(&self) -> Statement {
        Statement::new(self.inner.clone())
    }

    /// Allocate and prepare a statement.
    pub async fn prepare(&self, tx: &Transaction, sql: &str) -> Result<Statement> {
        let statement = self.statement();
        statement.prepare(tx, sql).await?;
        Ok(statement)
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.roundtrip(frontend::Ping).await?;
        Ok(())
    }

    /// Request database info `items`, returns the raw info reply.
    pub async fn info(&self, items: &[u8]) -> Result<Bytes> {
        let inner = &self.inner;
        let response = inner
            .roundtrip(frontend::InfoDatabase {
                handle: inner.handle(),
                items,
                buffer_len: DEFAULT_INFO_SIZE,
            })
            .await?;
        Ok(response.data)
    }

    /// Send `op_cancel` out of band, without waiting for the running operation.
    ///
    /// # Errors
    ///
    /// Fails with `feature_unsupported` before protocol 12.
    pub async fn cancel_operation(&self, kind: CancelKind) -> Result<()> {
        let inner = &self.inner;
        if !inner.supports(Capability::Cancel) {
            return Err(feature_unsupported("op_cancel", &inner.descriptor));
        }
        inner.ensure_usable()?;

        let mut buf = BytesMut::with_capacity(8);
        frontend::write(frontend::Cancel { handle: kind as i32 }, &mut buf)?;

        let mut writer = inner.writer.lock().await;
        let mut result = writer.write_all(&buf).await;
        if result.is_ok() {
            result = writer.flush().await;
        }
        drop(writer);

        let result = result.map_err(|err| {
            ExceptionBuilder::new().exception(codes::NET_WRITE_ERR).cause(err).into_error()
        });
        inner.check(result)
    }

    /// Queue `handle`, its [`EventHandle::wait`] resolves on the matching `op_event`.
    ///
    /// The auxiliary connection is opened on first use and again after it closed.
    pub async fn queue_event(&self, handle: &EventHandle) -> Result<()> {
        let inner = &*self.inner;
        let mut events = inner.events.lock().await;
        let channel = match events.take() {
            Some(channel) if !channel.is_closed() => channel,
            _ => inner.open_event_channel().await?,
        };
        let channel = events.insert(channel);

        let local_id = handle.assign_local_id();
        channel.register(handle);
        let epb = handle.epb();
        let result = inner
            .roundtrip(frontend::QueEvents { aux_handle: channel.aux_handle(), epb: &epb, local_id })
            .await;
        match result {
            Ok(_response) => {
                verbose!("queued {} as {local_id}, event id {}", handle.name(), _response.handle);
                Ok(())
            }
            Err(err) => {
                channel.unregister(local_id);
                Err(err)
            }
        }
    }

    /// Cancel the last queue request of `handle`, nothing is sent if it is not queued.
    pub async fn cancel_event(&self, handle: &EventHandle) -> Result<()> {
        let inner = &*self.inner;
        let local_id = handle.local_id();
        let events = inner.events.lock().await;
        match events.as_ref() {
            Some(channel) if channel.unregister(local_id) => {}
            _ => return Ok(()),
        }
        drop(events);
        inner.roundtrip(frontend::CancelEvents { database: inner.handle(), local_id }).await?;
        Ok(())
    }

    /// Open blob `id` of `tx` for reading.
    ///
    /// With an empty `bpb`, a blob delivered inline is served from the cache without a
    /// round trip, at most once.
    pub async fn open_blob(&self, tx: &Transaction, id: BlobId, bpb: &[u8]) -> Result<InputBlob> {
        verbose!("open_blob");
        tx.ensure_active()?;
        let inner = &self.inner;

        if bpb.is_empty() {
            if let Some(mut blob) = inner.cache.take(tx.handle(), id) {
                verbose!("blob {id:?} served from inline cache");
                blob.open()?;
                return Ok(InputBlob::Inline(blob));
            }
        }

        let response = match bpb.is_empty() {
            true => inner.roundtrip(frontend::OpenBlob { transaction: tx.handle(), blob_id: id.0 }).await?,
            false => {
                inner
                    .roundtrip(frontend::OpenBlob2 { bpb, transaction: tx.handle(), blob_id: id.0 })
                    .await?
            }
        };
        Ok(InputBlob::Remote(RemoteBlob::new(inner.clone(), tx.handle(), id, response.handle)))
    }

    /// Create blob in `tx` for writing.
    pub async fn create_blob(&self, tx: &Transaction, bpb: &[u8]) -> Result<OutputBlob> {
        verbose!("create_blob");
        tx.ensure_active()?;
        let inner = &self.inner;
        let response = inner
            .roundtrip(frontend::CreateBlob2 { bpb, transaction: tx.handle() })
            .await?;
        Ok(OutputBlob::new(inner.clone(), tx.handle(), BlobId(response.object_id), response.handle))
    }
}

/// `feature_unsupported` error for `feature` on the negotiated protocol.
pub(crate) fn feature_unsupported(feature: &str, descriptor: &ProtocolDescriptor) -> Error {
    ExceptionBuilder::new()
        .exception(codes::FEATURE_UNSUPPORTED)
        .message_parameter(feature)
        .number_parameter(descriptor.revision().number().into())
        .into_error()
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("handle", &self.inner.handle())
            .field("protocol", &self.inner.descriptor.revision().number())
            .field("valid", &self.is_valid())
            .finish()
    }
}
