use std::fmt;

use super::{ExceptionType, FbException, codes, messages};
use crate::{Error, ErrorKind};

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Codes which say little about the actual failure, the flat message takes its SQLSTATE and
/// code from the first entry outside this list.
const GENERIC: [i32; 8] = [
    0,
    codes::DSQL_ERROR,
    codes::DSQL_LINE_COL_ERROR,
    codes::DSQL_UNKNOWN_POS,
    codes::SQLERR,
    codes::DSQL_COMMAND_ERR,
    codes::ARITH_EXCEPT,
    codes::CANCELLED,
];

struct Entry {
    kind: ExceptionType,
    code: i32,
    sql_state: Option<String>,
    params: Vec<String>,
    cause: Option<Cause>,
}

impl Entry {
    fn sql_state(&self) -> &str {
        match &self.sql_state {
            Some(state) => state,
            None => messages::sql_state(self.code).unwrap_or(self.kind.default_sql_state()),
        }
    }

    fn message(&self) -> String {
        messages::render(self.code, &self.params)
    }

    fn is_interesting(&self) -> bool {
        !GENERIC.contains(&self.code) && self.sql_state() != "00000"
    }
}

/// Builder for [`FbException`].
///
/// The first entry decides the category, later entries chain behind it.
///
/// ```
/// use fbwire::exception::{ExceptionBuilder, ExceptionType, codes};
///
/// let err = ExceptionBuilder::new()
///     .exception(codes::NETWORK_ERROR)
///     .message_parameter("localhost")
///     .to_flat_exception()
///     .unwrap();
///
/// assert_eq!(err.kind(), ExceptionType::NonTransient);
/// assert_eq!(err.sql_state(), "08006");
/// ```
#[derive(Default)]
pub struct ExceptionBuilder {
    entries: Vec<Entry>,
}

impl ExceptionBuilder {
    /// Create empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, kind: ExceptionType, code: i32) -> Self {
        self.entries.push(Entry { kind, code, sql_state: None, params: vec![], cause: None });
        self
    }

    /// Add an error entry, the category is upgraded for network, login and timeout codes.
    pub fn exception(self, code: i32) -> Self {
        self.push(ExceptionType::Exception.upgrade(code), code)
    }

    /// Add a warning entry.
    pub fn warning(self, code: i32) -> Self {
        self.push(ExceptionType::Warning, code)
    }

    /// Add a timeout entry.
    pub fn timeout_exception(self, code: i32) -> Self {
        self.push(ExceptionType::Timeout, code)
    }

    /// Add a non transient entry.
    pub fn non_transient(self, code: i32) -> Self {
        self.push(ExceptionType::NonTransient, code)
    }

    /// Add a non transient connect entry.
    pub fn non_transient_connect(self, code: i32) -> Self {
        self.push(ExceptionType::NonTransientConnect, code)
    }

    /// Add a transient entry.
    pub fn transient(self, code: i32) -> Self {
        self.push(ExceptionType::Transient, code)
    }

    /// Append message parameter to the current entry.
    ///
    /// Without any entry, this is a no-op.
    pub fn message_parameter(mut self, param: impl fmt::Display) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.params.push(param.to_string());
        }
        self
    }

    /// Append integer message parameter to the current entry.
    pub fn number_parameter(mut self, param: i64) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.params.push(itoa::Buffer::new().format(param).to_owned());
        }
        self
    }

    /// Override SQLSTATE of the current entry.
    ///
    /// # Errors
    ///
    /// Returns error if there is no entry yet, if the state is not exactly 5 characters, or if
    /// the current entry state was already overridden.
    pub fn sql_state(mut self, state: &str) -> Result<Self, UsageError> {
        let Some(entry) = self.entries.last_mut() else {
            return Err(UsageError::NoEntry);
        };
        if state.chars().count() != 5 {
            return Err(UsageError::InvalidSqlState(state.into()));
        }
        if entry.sql_state.is_some() {
            return Err(UsageError::SqlStateOverridden);
        }
        entry.sql_state = Some(state.into());
        Ok(self)
    }

    /// Override SQLSTATE as reported by the server, ignoring a malformed one.
    pub(crate) fn reported_sql_state(mut self, state: &str) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            if state.chars().count() == 5 {
                entry.sql_state = Some(state.into());
            }
        }
        self
    }

    /// Attach the underlying cause to the current entry.
    pub fn cause(mut self, cause: impl Into<Cause>) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.cause = Some(cause.into());
        }
        self
    }

    /// Returns `true` if no entry has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the first entry is a warning.
    pub fn is_warning(&self) -> bool {
        self.entries.first().is_some_and(|e| matches!(e.kind, ExceptionType::Warning))
    }

    /// Build exception chain, one exception per entry.
    ///
    /// Returns `None` if builder is empty.
    pub fn to_exception(&mut self) -> Option<FbException> {
        let mut next = None;
        for mut entry in std::mem::take(&mut self.entries).into_iter().rev() {
            next = Some(Box::new(FbException {
                kind: entry.kind,
                code: entry.code,
                sql_state: entry.sql_state().to_owned(),
                message: entry.message(),
                cause: entry.cause.take(),
                next,
            }));
        }
        next.map(|e| *e)
    }

    /// Build single exception with the messages of all entries joined.
    ///
    /// Returns `None` if builder is empty.
    pub fn to_flat_exception(&mut self) -> Option<FbException> {
        let mut entries = std::mem::take(&mut self.entries);
        let head = entries.first()?;

        let interesting = entries.iter().position(Entry::is_interesting).unwrap_or(0);

        let kind = match head.kind {
            ExceptionType::Exception => entries[interesting].kind,
            kind => kind,
        };

        let mut message = String::new();
        for (i, entry) in entries.iter().enumerate() {
            if i != 0 {
                message.push_str("; ");
            }
            message.push_str(&entry.message());
        }

        let chosen = &entries[interesting];
        let code = chosen.code;
        let sql_state = chosen.sql_state().to_owned();
        message.push_str(" [SQLState:");
        message.push_str(&sql_state);
        message.push_str(", ISC error code:");
        message.push_str(itoa::Buffer::new().format(code));
        message.push(']');

        let cause = entries.iter_mut().find_map(|e| e.cause.take());

        Some(FbException { kind, code, sql_state, message, next: None, cause })
    }

    /// Build flat exception and check its category.
    ///
    /// # Errors
    ///
    /// Returns [`CastError`] if the built category differs from `expected`, or
    /// [`UsageError::Empty`] if builder is empty.
    pub fn to_exception_as(&mut self, expected: ExceptionType) -> Result<FbException, Error> {
        let Some(exception) = self.to_flat_exception() else {
            return Err(UsageError::Empty.into());
        };
        if exception.kind() != expected {
            return Err(CastError { expected, found: exception.kind(), exception }.into());
        }
        Ok(exception)
    }

    /// Build flat exception as crate [`Error`].
    pub fn into_error(mut self) -> Error {
        match self.to_flat_exception() {
            Some(ok) => ok.into(),
            None => ErrorKind::Usage(UsageError::Empty).into(),
        }
    }
}

/// Misuse of [`ExceptionBuilder`].
#[derive(Debug, PartialEq, Eq)]
pub enum UsageError {
    /// Operation requires an entry added via `exception` or `warning` first.
    NoEntry,
    /// SQLSTATE must be exactly 5 characters.
    InvalidSqlState(String),
    /// SQLSTATE of the current entry was already overridden.
    SqlStateOverridden,
    /// Nothing to build.
    Empty,
}

impl std::error::Error for UsageError { }

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntry => f.write_str("no exception or warning added yet"),
            Self::InvalidSqlState(s) => write!(f, "SQLSTATE must be 5 characters, got {s:?}"),
            Self::SqlStateOverridden => f.write_str("SQLSTATE already overridden"),
            Self::Empty => f.write_str("exception builder is empty"),
        }
    }
}

/// Built exception category does not match the expected one.
pub struct CastError {
    pub expected: ExceptionType,
    pub found: ExceptionType,
    pub exception: FbException,
}

impl std::error::Error for CastError { }

impl fmt::Display for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {:?} exception, found {:?}: {}",
            self.expected, self.found, self.exception
        )
    }
}

impl fmt::Debug for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use codes::*;

    #[test]
    fn upgrade_type() {
        let e = ExceptionBuilder::new().exception(LOGIN).to_flat_exception().unwrap();
        assert_eq!(e.kind(), ExceptionType::NonTransient);
        assert_eq!(e.sql_state(), "28000");

        let e = ExceptionBuilder::new().exception(REQ_STMT_TIMEOUT).to_flat_exception().unwrap();
        assert_eq!(e.kind(), ExceptionType::Timeout);

        let e = ExceptionBuilder::new().exception(BUG_CHECK).to_flat_exception().unwrap();
        assert_eq!(e.kind(), ExceptionType::Exception);
        assert_eq!(e.sql_state(), "HY000");
    }

    #[test]
    fn sql_state_override() {
        assert_eq!(ExceptionBuilder::new().sql_state("42000").err(), Some(UsageError::NoEntry));

        let b = ExceptionBuilder::new().exception(RANDOM);
        assert!(matches!(b.sql_state("4200"), Err(UsageError::InvalidSqlState(_))));

        let b = ExceptionBuilder::new().exception(RANDOM).sql_state("42S02").unwrap();
        assert!(matches!(b.sql_state("42000"), Err(UsageError::SqlStateOverridden)));

        let mut b = ExceptionBuilder::new()
            .warning(RANDOM)
            .message_parameter("w")
            .sql_state("01S00")
            .unwrap();
        let e = b.to_exception().unwrap();
        assert_eq!(e.sql_state(), "01S00");
        assert!(e.is_warning());
    }

    #[test]
    fn flat_message() {
        let mut b = ExceptionBuilder::new()
            .exception(SQLERR)
            .exception(DSQL_ERROR)
            .exception(BAD_TRANS_HANDLE)
            .exception(DSQL_LINE_COL_ERROR)
            .number_parameter(1)
            .number_parameter(8);
        let e = b.to_flat_exception().unwrap();
        assert!(b.is_empty());
        assert_eq!(e.code(), BAD_TRANS_HANDLE);
        assert_eq!(e.sql_state(), "25000");
        assert_eq!(
            e.message(),
            "Dynamic SQL Error; Dynamic SQL Error; \
            invalid transaction handle (expecting explicit transaction start); \
            At line 1, column 8 [SQLState:25000, ISC error code:335544332]"
        );
    }

    #[test]
    fn flat_without_interesting_entry() {
        let e = ExceptionBuilder::new()
            .exception(SQLERR)
            .to_flat_exception()
            .unwrap();
        assert_eq!(e.code(), SQLERR);
        assert_eq!(e.message(), "Dynamic SQL Error [SQLState:42000, ISC error code:335544436]");
    }

    #[test]
    fn chained() {
        let e = ExceptionBuilder::new()
            .exception(NETWORK_ERROR)
            .message_parameter("db")
            .exception(NET_READ_ERR)
            .to_exception()
            .unwrap();
        assert_eq!(e.code(), NETWORK_ERROR);
        assert_eq!(e.message(), "Unable to complete network request to host \"db\".");
        assert_eq!(e.next().map(FbException::code), Some(NET_READ_ERR));
        assert_eq!(e.iter().count(), 2);
        assert!(e.contains(NET_READ_ERR));
    }

    #[test]
    fn missing_parameter() {
        let e = ExceptionBuilder::new()
            .exception(DSQL_LINE_COL_ERROR)
            .number_parameter(3)
            .to_exception()
            .unwrap();
        assert_eq!(e.message(), "At line 3, column (null)");
    }

    #[test]
    fn cast_helper() {
        let ok = ExceptionBuilder::new()
            .timeout_exception(NETWORK_ERROR)
            .to_exception_as(ExceptionType::Timeout);
        assert!(ok.is_ok());

        let err = ExceptionBuilder::new()
            .warning(RANDOM)
            .to_exception_as(ExceptionType::Timeout)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Cast(_)));

        let err = ExceptionBuilder::new().to_exception_as(ExceptionType::Warning).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Usage(UsageError::Empty)));
    }
}
