//! Buffered wire stream.
use bytes::{Buf, Bytes, BytesMut};
use std::{io, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};

use crate::{
    Result,
    common::{verbose, warn},
    exception::{ExceptionBuilder, FbException, arg, codes},
    net::Socket,
    protocol::{FrontendProtocol, op},
    xdr::padding,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Write half of the socket, shared with out of band senders.
pub(crate) type SharedWriter = Arc<Mutex<WriteHalf<Socket>>>;

/// A buffered socket which speaks in XDR items.
///
/// Writes are buffered until [`WireStream::flush`]. Every read waits at most for the configured
/// socket timeout.
pub struct WireStream {
    reader: ReadHalf<Socket>,
    writer: SharedWriter,
    read_buf: BytesMut,
    write_buf: BytesMut,
    socket_timeout: Option<Duration>,
}

impl WireStream {
    pub fn new(socket: Socket, socket_timeout: Option<Duration>) -> Self {
        let (reader, writer) = tokio::io::split(socket);
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            socket_timeout,
        }
    }

    /// Buffer a message.
    ///
    /// Note that this send is buffered, caller must also call [`WireStream::flush`] afterwards.
    ///
    /// # Errors
    ///
    /// A length exceeding its wire prefix is an encode error, nothing is buffered.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) -> Result<()> {
        verbose!("(F) {}", op::name(F::OPCODE));
        crate::protocol::frontend::write(message, &mut self.write_buf)?;
        Ok(())
    }

    /// Raw access to the write buffer.
    pub(crate) fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    /// Handle for writing without holding the stream.
    pub(crate) fn shared_writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    /// Write all buffered messages.
    ///
    /// # Errors
    ///
    /// Write failure is `isc_net_write_err`, the connection must not be used afterwards.
    pub async fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        let mut result = writer.write_all_buf(&mut self.write_buf).await;
        if result.is_ok() {
            result = writer.flush().await;
        }
        if let Err(err) = result {
            self.write_buf.clear();
            return Err(ExceptionBuilder::new()
                .exception(codes::NET_WRITE_ERR)
                .cause(err)
                .into_error());
        }
        Ok(())
    }

    /// Close the write side of the socket.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    /// Make sure at least `len` bytes are buffered.
    async fn fill(&mut self, len: usize) -> Result<()> {
        while self.read_buf.len() < len {
            self.read_buf.reserve(len - self.read_buf.len());
            let read = self.reader.read_buf(&mut self.read_buf);
            let result = match self.socket_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        let cause = io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("read timed out after {} ms", timeout.as_millis()),
                        );
                        return Err(ExceptionBuilder::new()
                            .timeout_exception(codes::NET_READ_ERR)
                            .cause(cause)
                            .into_error());
                    }
                },
                None => read.await,
            };
            match result {
                Ok(0) => {
                    return Err(ExceptionBuilder::new()
                        .exception(codes::NET_READ_ERR)
                        .cause(io::Error::from(io::ErrorKind::UnexpectedEof))
                        .into_error());
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(ExceptionBuilder::new()
                        .exception(codes::NET_READ_ERR)
                        .cause(err)
                        .into_error());
                }
            }
        }
        Ok(())
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        self.fill(4).await?;
        Ok(self.read_buf.get_i32())
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        self.fill(8).await?;
        Ok(self.read_buf.get_i64())
    }

    /// Read `len` bytes followed by their padding.
    pub async fn read_fixed(&mut self, len: usize) -> Result<Bytes> {
        let total = len + padding(len);
        self.fill(total).await?;
        let bytes = self.read_buf.split_to(len).freeze();
        self.read_buf.advance(padding(len));
        Ok(bytes)
    }

    /// Read length prefixed opaque buffer.
    pub async fn read_buffer(&mut self) -> Result<Bytes> {
        let len = self.read_i32().await?;
        let Ok(len) = usize::try_from(len) else {
            return Err(crate::protocol::ProtocolError::InvalidLength(len).into());
        };
        self.read_fixed(len).await
    }

    pub async fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_buffer().await?;
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    /// Read next operation code, `op_dummy` is skipped.
    pub async fn read_operation(&mut self) -> Result<i32> {
        loop {
            let opcode = self.read_i32().await?;
            if opcode != op::DUMMY {
                verbose!("(B) {}", op::name(opcode));
                return Ok(opcode);
            }
        }
    }

    /// Read status vector.
    ///
    /// Warnings are logged and result in `None`.
    pub async fn read_status_vector(&mut self) -> Result<Option<FbException>> {
        let mut builder = ExceptionBuilder::new();
        loop {
            match self.read_i32().await? {
                arg::END => break,
                arg::GDS => {
                    let code = self.read_i32().await?;
                    if code != 0 {
                        builder = builder.exception(code);
                    }
                }
                arg::WARNING => {
                    let code = self.read_i32().await?;
                    if code != 0 {
                        builder = builder.warning(code);
                    }
                }
                arg::INTERPRETED | arg::STRING => {
                    let value = self.read_buffer().await?;
                    builder = builder.message_parameter(String::from_utf8_lossy(&value));
                }
                arg::SQL_STATE => {
                    let state = self.read_string().await?;
                    builder = builder.reported_sql_state(&state);
                }
                _ => {
                    let value = self.read_i32().await?;
                    builder = builder.number_parameter(value.into());
                }
            }
        }

        let Some(exception) = builder.to_flat_exception() else {
            return Ok(None);
        };

        if exception.is_warning() {
            warn!("{exception}");
            return Ok(None);
        }

        Ok(Some(exception))
    }
}

impl std::fmt::Debug for WireStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireStream")
            .field("read_buf", &self.read_buf.len())
            .field("write_buf", &self.write_buf.len())
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}
