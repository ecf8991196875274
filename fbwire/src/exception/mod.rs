//! Structured database error.
//!
//! - [`FbException`]
//! - [`ExceptionBuilder`]
//! - [`ExceptionType`]
//!
//! Errors reported by the server arrive as a status vector, an ordered list of
//! `(code, parameters)` entries. [`ExceptionBuilder`] accumulates those entries and renders
//! them into a [`FbException`] with templated message and SQLSTATE classification.
use std::fmt;

mod builder;
pub mod codes;
pub mod messages;

pub use builder::{CastError, ExceptionBuilder, UsageError};

/// Status vector argument tags.
pub mod arg {
    pub const END: i32 = 0;
    pub const GDS: i32 = 1;
    pub const STRING: i32 = 2;
    pub const CSTRING: i32 = 3;
    pub const NUMBER: i32 = 4;
    pub const INTERPRETED: i32 = 5;
    pub const WARNING: i32 = 18;
    pub const SQL_STATE: i32 = 19;
}

/// Category of an exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionType {
    /// Generic error.
    Exception,
    /// Non fatal warning.
    Warning,
    /// An operation exceeded its time bound.
    Timeout,
    /// Retrying the same operation will fail again.
    NonTransient,
    /// Connection can not be established.
    NonTransientConnect,
    /// Retrying may succeed.
    Transient,
}

impl ExceptionType {
    /// SQLSTATE used when neither the entry nor its code provide one.
    pub const fn default_sql_state(self) -> &'static str {
        match self {
            Self::Warning => "01000",
            Self::Timeout => "HYT00",
            Self::NonTransientConnect => "08000",
            Self::Exception | Self::NonTransient | Self::Transient => "HY000",
        }
    }

    /// Type after considering the code, only generic [`ExceptionType::Exception`] is upgraded.
    pub(crate) fn upgrade(self, code: i32) -> Self {
        use codes::*;

        if !matches!(self, Self::Exception) {
            return self;
        }

        match code {
            LOGIN | NET_WRITE_ERR | NET_READ_ERR | NETWORK_ERROR | WIRECRYPT_INCOMPATIBLE
            | MISS_WIRECRYPT | WIRECRYPT_KEY | WIRECRYPT_PLUGIN => Self::NonTransient,
            CFG_STMT_TIMEOUT | ATT_STMT_TIMEOUT | REQ_STMT_TIMEOUT => Self::Timeout,
            _ => self,
        }
    }
}

/// Error or warning reported by the server or raised by the client.
pub struct FbException {
    kind: ExceptionType,
    code: i32,
    sql_state: String,
    message: String,
    next: Option<Box<FbException>>,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FbException {
    /// Returns the exception category.
    pub fn kind(&self) -> ExceptionType {
        self.kind
    }

    /// Returns the error code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the five character SQLSTATE.
    pub fn sql_state(&self) -> &str {
        &self.sql_state
    }

    /// Returns the rendered message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the next exception in the chain.
    pub fn next(&self) -> Option<&FbException> {
        self.next.as_deref()
    }

    /// Returns `true` if this is a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self.kind, ExceptionType::Warning)
    }

    /// Iterate this exception followed by its chained exceptions.
    pub fn iter(&self) -> impl Iterator<Item = &FbException> {
        std::iter::successors(Some(self), |e| e.next())
    }

    /// Returns `true` if this or any chained exception carries `code`.
    pub fn contains(&self, code: i32) -> bool {
        self.iter().any(|e| e.code == code)
    }
}

impl std::error::Error for FbException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

impl fmt::Display for FbException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FbException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FbException")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("sql_state", &self.sql_state)
            .field("message", &self.message)
            .field("next", &self.next)
            .finish()
    }
}
