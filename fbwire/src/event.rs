//! Database events.
//!
//! Events posted with `post_event` are delivered over a second, auxiliary connection. The
//! server opens a port for it on `op_connect_request`, queue and cancel requests still go over
//! the main connection:
//!
//! ```text
//! main                                auxiliary
//! op_connect_request -> port
//!                                     tcp connect host:port
//! op_que_events(local id, count)
//!                                     <- op_event(local id, count)
//! op_cancel_events(local id)
//! ```
//!
//! Every queue is answered with exactly one `op_event`, once the server count differs from the
//! count sent with the request. The first queue of a handle therefore fires right away with the
//! current count.
use bytes::{Buf, BufMut, BytesMut};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
    },
};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{
    Result,
    common::{verbose, warn},
    exception::{ExceptionBuilder, codes},
    protocol::{ProtocolError, epb, op},
    row::EncodeError,
    stream::WireStream,
};

/// Max length of an event name.
pub const MAX_NAME_LEN: usize = 255;

static LOCAL_ID: AtomicI32 = AtomicI32::new(0);

/// Interest in one named event.
///
/// Queue it with [`Database::queue_event`][crate::Database::queue_event], then
/// [`wait`][EventHandle::wait] for the notification.
#[derive(Clone)]
pub struct EventHandle {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    local_id: AtomicI32,
    /// Count last reported by the server.
    internal: AtomicU32,
    /// Count at the last [`EventHandle::count_events`].
    previous: AtomicU32,
    notify: Notify,
    closed: AtomicBool,
}

impl EventHandle {
    /// Handle for event `name`.
    ///
    /// # Errors
    ///
    /// A name longer than 255 bytes is an encode error.
    pub fn new(name: impl Into<String>) -> Result<EventHandle> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(EncodeError::Overflow { len: name.len(), max: MAX_NAME_LEN }.into());
        }
        Ok(EventHandle {
            shared: Arc::new(Shared {
                name,
                local_id: AtomicI32::new(0),
                internal: AtomicU32::new(0),
                previous: AtomicU32::new(0),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Id of the last queue request, `0` before the first.
    pub fn local_id(&self) -> i32 {
        self.shared.local_id.load(Ordering::Acquire)
    }

    /// Wait for the `op_event` answering the last queue request.
    ///
    /// # Errors
    ///
    /// Fails with `connection_invalid` once the auxiliary connection is closed.
    pub async fn wait(&self) -> Result<()> {
        self.shared.notify.notified().await;
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ExceptionBuilder::new()
                .non_transient_connect(codes::CONNECTION_INVALID)
                .message_parameter("event connection closed")
                .into_error());
        }
        Ok(())
    }

    /// Occurrences since the previous call, as reported by the last `op_event`.
    pub fn count_events(&self) -> u32 {
        let internal = self.shared.internal.load(Ordering::Acquire);
        let previous = self.shared.previous.swap(internal, Ordering::AcqRel);
        internal.wrapping_sub(previous)
    }

    pub(crate) fn assign_local_id(&self) -> i32 {
        let id = LOCAL_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.shared.local_id.store(id, Ordering::Release);
        id
    }

    /// Event parameter block with the last known count.
    ///
    /// ```text
    /// [version] ([name len: u8] [name] [count: u32 le])
    /// ```
    pub(crate) fn epb(&self) -> BytesMut {
        let name = self.shared.name.as_bytes();
        let mut buf = BytesMut::with_capacity(6 + name.len());
        buf.put_u8(epb::VERSION1);
        // checked by EventHandle::new
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf.put_u32_le(self.shared.internal.load(Ordering::Acquire));
        buf
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("name", &self.shared.name)
            .field("local_id", &self.local_id())
            .field("count", &self.shared.internal.load(Ordering::Acquire))
            .finish()
    }
}

/// Count of the single event in an `op_event` buffer.
fn event_count(mut buf: &[u8]) -> Result<u32> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::truncated(2, buf.remaining()).into());
    }
    let _version = buf.get_u8();
    let name_len = usize::from(buf.get_u8());
    if buf.remaining() < name_len + 4 {
        return Err(ProtocolError::truncated(name_len + 4, buf.remaining()).into());
    }
    buf.advance(name_len);
    Ok(buf.get_u32_le())
}

/// Port of the auxiliary connection, from the `sockaddr` in the `op_connect_request` reply.
///
/// ```text
/// [family: u16] [port: u16 be] [address..]
/// ```
///
/// The address is ignored, the client connects to the host of the main connection.
pub(crate) fn aux_port(data: &[u8]) -> Result<u16> {
    match data {
        [_, _, hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ProtocolError::truncated(4, data.len()).into()),
    }
}

#[derive(Default)]
struct Listeners {
    map: StdMutex<HashMap<i32, Arc<Shared>>>,
    closed: AtomicBool,
}

impl Listeners {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Arc<Shared>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, local_id: i32, count: u32) {
        let Some(shared) = self.map().remove(&local_id) else {
            verbose!("event {local_id} not queued");
            return;
        };
        verbose!("event {} count {count}", shared.name);
        shared.internal.store(count, Ordering::Release);
        shared.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for (_, shared) in self.map().drain() {
            shared.closed.store(true, Ordering::Release);
            shared.notify.notify_one();
        }
    }
}

/// Auxiliary connection and its reader task.
///
/// Dropping it stops the reader, handles still queued fail their wait.
pub(crate) struct EventChannel {
    aux_handle: i32,
    listeners: Arc<Listeners>,
    task: JoinHandle<()>,
}

impl EventChannel {
    /// Spawn the reader of `stream`.
    pub(crate) fn start(stream: WireStream, aux_handle: i32) -> EventChannel {
        let listeners = Arc::new(Listeners::default());
        let task = tokio::spawn(run(stream, listeners.clone()));
        EventChannel { aux_handle, listeners, task }
    }

    pub(crate) fn aux_handle(&self) -> i32 {
        self.aux_handle
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.listeners.closed.load(Ordering::Acquire)
    }

    /// Listen for `handle` under its current local id, before the queue request is sent.
    pub(crate) fn register(&self, handle: &EventHandle) {
        handle.shared.closed.store(false, Ordering::Release);
        self.listeners.map().insert(handle.local_id(), handle.shared.clone());
    }

    /// Stop listening, returns `false` if `local_id` was not queued.
    pub(crate) fn unregister(&self, local_id: i32) -> bool {
        self.listeners.map().remove(&local_id).is_some()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.task.abort();
        self.listeners.close();
    }
}

async fn run(mut stream: WireStream, listeners: Arc<Listeners>) {
    match read_events(&mut stream, &listeners).await {
        Ok(()) => {
            verbose!("event connection closed by server");
        }
        Err(_err) => {
            warn!("event connection failed: {_err}");
        }
    }
    listeners.close();
}

async fn read_events(stream: &mut WireStream, listeners: &Listeners) -> Result<()> {
    loop {
        match stream.read_operation().await? {
            op::EXIT | op::DISCONNECT => return Ok(()),
            op::EVENT => {
                let _database = stream.read_i32().await?;
                let buffer = stream.read_buffer().await?;
                let _ast = stream.read_i64().await?;
                let local_id = stream.read_i32().await?;
                listeners.deliver(local_id, event_count(&buffer)?);
            }
            found => return Err(ProtocolError::unexpected_phase(found, "event connection").into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::{ErrorKind, stream::test::pair, xdr::XdrBufMut};

    const EVT: [u8; 9] = [1, 3, b'E', b'V', b'T', 3, 0, 0, 0];

    fn put_event(buf: &mut BytesMut, data: &[u8], local_id: i32) {
        buf.put_xdr_i32(op::EVENT);
        buf.put_xdr_i32(1);
        buf.put_xdr_buffer(data).unwrap();
        buf.put_xdr_i64(0);
        buf.put_xdr_i32(local_id);
    }

    fn channel() -> (EventChannel, DuplexStream) {
        let (stream, server) = pair(None);
        (EventChannel::start(stream, 5), server)
    }

    #[test]
    fn epb_layout() {
        let handle = EventHandle::new("EVT").unwrap();
        assert_eq!(&handle.epb()[..], &[1, 3, b'E', b'V', b'T', 0, 0, 0, 0]);

        handle.shared.internal.store(0x0102, Ordering::Release);
        assert_eq!(&handle.epb()[5..], &[2, 1, 0, 0]);
    }

    #[test]
    fn name_too_long() {
        let err = EventHandle::new("E".repeat(256)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Encode(EncodeError::Overflow { len: 256, max: 255 })));
        assert!(EventHandle::new("E".repeat(255)).is_ok());
    }

    #[test]
    fn count_from_buffer() {
        assert_eq!(event_count(&EVT).unwrap(), 3);
        assert!(matches!(
            event_count(&EVT[..7]).unwrap_err().kind(),
            ErrorKind::Protocol(ProtocolError::Truncated { expected: 7, remaining: 5 })
        ));
        assert!(event_count(&[1]).is_err());
    }

    #[test]
    fn port_from_sockaddr() {
        assert_eq!(aux_port(&[0, 2, 0x0b, 0xea, 127, 0, 0, 1]).unwrap(), 3050);
        assert!(aux_port(&[0, 2, 0x0b]).is_err());
    }

    #[test]
    fn count_since_previous() {
        let handle = EventHandle::new("EVT").unwrap();
        handle.shared.internal.store(5, Ordering::Release);
        assert_eq!(handle.count_events(), 5);
        assert_eq!(handle.count_events(), 0);
        handle.shared.internal.store(8, Ordering::Release);
        assert_eq!(handle.count_events(), 3);
    }

    #[test]
    fn local_id_per_queue() {
        let handle = EventHandle::new("EVT").unwrap();
        assert_eq!(handle.local_id(), 0);
        let first = handle.assign_local_id();
        let second = handle.assign_local_id();
        assert_ne!(first, second);
        assert_eq!(handle.local_id(), second);
    }

    #[tokio::test]
    async fn deliver_split_event() {
        let (events, mut server) = channel();
        let handle = EventHandle::new("EVT").unwrap();
        let other = EventHandle::new("OTHER").unwrap();
        let id = handle.assign_local_id();
        other.assign_local_id();
        events.register(&handle);
        events.register(&other);

        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::DUMMY);
        put_event(&mut buf, &EVT, id);
        server.write_all(&buf[..10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.write_all(&buf[10..]).await.unwrap();

        handle.wait().await.unwrap();
        assert_eq!(handle.count_events(), 3);
        assert!(!events.unregister(id));
        assert!(events.unregister(other.local_id()));
    }

    #[tokio::test]
    async fn unknown_id_ignored() {
        let (events, mut server) = channel();
        let handle = EventHandle::new("EVT").unwrap();
        let id = handle.assign_local_id();
        events.register(&handle);

        let mut buf = BytesMut::new();
        put_event(&mut buf, &EVT, id + 100);
        put_event(&mut buf, &[1, 3, b'E', b'V', b'T', 4, 0, 0, 0], id);
        server.write_all(&buf).await.unwrap();

        handle.wait().await.unwrap();
        assert_eq!(handle.count_events(), 4);
    }

    #[tokio::test]
    async fn exit_closes_channel() {
        let (events, mut server) = channel();
        let handle = EventHandle::new("EVT").unwrap();
        handle.assign_local_id();
        events.register(&handle);

        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::EXIT);
        server.write_all(&buf).await.unwrap();

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.code(), Some(codes::CONNECTION_INVALID));
        assert!(events.is_closed());
    }

    #[tokio::test]
    async fn drop_fails_waiters() {
        let (events, _server) = channel();
        let handle = EventHandle::new("EVT").unwrap();
        handle.assign_local_id();
        events.register(&handle);

        drop(events);
        assert!(handle.wait().await.is_err());
    }
}
