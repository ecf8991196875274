//! `fbwire` error types.
use std::{backtrace::Backtrace, fmt, str::Utf8Error};

use crate::{
    auth::AuthError,
    connection::ParseError,
    exception::{CastError, ExceptionType, FbException, UsageError, codes},
    protocol::ProtocolError,
    row::{DecodeError, EncodeError},
};

/// A specialized [`Result`] type for `fbwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `fbwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the database exception, if this error is one.
    pub fn exception(&self) -> Option<&FbException> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            ErrorKind::Cast(e) => Some(&e.exception),
            _ => None,
        }
    }

    /// Returns the error code of database exception.
    pub fn code(&self) -> Option<i32> {
        self.exception().map(FbException::code)
    }

    /// Returns the SQLSTATE of database exception.
    pub fn sql_state(&self) -> Option<&str> {
        self.exception().map(FbException::sql_state)
    }

    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.exception().is_some_and(|e| matches!(e.kind(), ExceptionType::Timeout))
    }

    /// Returns `true` if the connection can not be used after this error.
    ///
    /// Protocol errors leave the stream at an unknown position, network failures leave it
    /// broken.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(_) => true,
            _ => matches!(
                self.code(),
                Some(codes::NET_READ_ERR | codes::NET_WRITE_ERR | codes::NETWORK_ERROR)
            ),
        }
    }

    /// Add context to the error.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `fbwire` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Database(FbException),
    Auth(AuthError),
    Usage(UsageError),
    Cast(CastError),
    Decode(DecodeError),
    Encode(EncodeError),
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<FbException>e => ErrorKind::Database(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<UsageError>e => ErrorKind::Usage(e));
from!(<CastError>e => ErrorKind::Cast(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Database(e) => std::error::Error::source(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Usage(e) => e.fmt(f),
            Self::Cast(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
