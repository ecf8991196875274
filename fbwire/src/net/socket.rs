use std::{io, pin::Pin, task::{Context, Poll}, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    Result,
    exception::{ExceptionBuilder, codes},
};

/// Either a `TcpStream` or an in memory pipe, which implement `AsyncRead` and `AsyncWrite`
/// transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    TokioTcp(tokio::net::TcpStream),
    #[cfg(test)]
    Duplex(tokio::io::DuplexStream),
}

impl Socket {
    /// Connect to `host:port`, bounded by `timeout` if any.
    ///
    /// # Errors
    ///
    /// Elapsed timeout is a timeout exception with `isc_network_error`, other failure is a
    /// non transient `isc_network_error`, both carry `host` as parameter.
    pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Socket> {
        let connect = tokio::net::TcpStream::connect((host, port));

        let result = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result,
                Err(_) => {
                    let cause = io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {} ms", timeout.as_millis()),
                    );
                    return Err(ExceptionBuilder::new()
                        .timeout_exception(codes::NETWORK_ERROR)
                        .message_parameter(host)
                        .cause(cause)
                        .into_error());
                }
            },
            None => connect.await,
        };

        let socket = result.and_then(|socket| {
            socket.set_nodelay(true)?;
            Ok(socket)
        });

        match socket {
            Ok(socket) => Ok(Socket { kind: Kind::TokioTcp(socket) }),
            Err(err) => Err(ExceptionBuilder::new()
                .exception(codes::NETWORK_ERROR)
                .message_parameter(host)
                .cause(err)
                .into_error()),
        }
    }

    /// In memory socket, the other end plays the server.
    #[cfg(test)]
    pub(crate) fn duplex(stream: tokio::io::DuplexStream) -> Socket {
        Socket { kind: Kind::Duplex(stream) }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(test)]
            Kind::Duplex(d) => Pin::new(d).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(test)]
            Kind::Duplex(d) => Pin::new(d).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(test)]
            Kind::Duplex(d) => Pin::new(d).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(test)]
            Kind::Duplex(d) => Pin::new(d).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::TokioTcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(test)]
            Kind::Duplex(_) => f.write_str("Duplex"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use crate::exception::ExceptionType;

    #[tokio::test]
    async fn connect_refused() {
        // bind then drop to get a free port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Socket::connect_tcp("127.0.0.1", port, None).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::NETWORK_ERROR));
        assert_eq!(err.sql_state(), Some("08006"));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    #[ignore = "requires a network stack that drops packets to non routable address"]
    async fn connect_timeout() {
        let start = Instant::now();
        let err = Socket::connect_tcp("10.255.255.1", 3050, Some(Duration::from_millis(2000)))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert_eq!(err.exception().map(|e| e.kind()), Some(ExceptionType::Timeout));
        assert_eq!(err.code(), Some(codes::NETWORK_ERROR));
        assert!(elapsed >= Duration::from_millis(2000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2500), "{elapsed:?}");
    }
}
