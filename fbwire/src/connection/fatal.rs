use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{Error, exception::codes};

/// Registry of error codes which invalidate the whole connection.
///
/// The registry is a shared handle: clones observe the same set, so it can be changed while
/// connections created from it are alive.
///
/// ```
/// use fbwire::{FatalErrors, exception::codes};
///
/// let fatal = FatalErrors::empty();
/// fatal.insert(codes::DSQL_RELATION_ERR);
///
/// assert!(fatal.contains(codes::DSQL_RELATION_ERR));
/// assert!(!fatal.contains(codes::BAD_DB_HANDLE));
/// ```
#[derive(Clone, Debug)]
pub struct FatalErrors {
    codes: Arc<RwLock<HashSet<i32>>>,
}

impl Default for FatalErrors {
    /// Codes reporting a broken database or attachment.
    fn default() -> Self {
        Self::from_codes(codes::DEFAULT_FATAL)
    }
}

impl FatalErrors {
    /// Registry without any code.
    pub fn empty() -> Self {
        Self::from_codes([])
    }

    pub fn from_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self { codes: Arc::new(RwLock::new(codes.into_iter().collect())) }
    }

    /// Add code, returns `false` if already present.
    pub fn insert(&self, code: i32) -> bool {
        self.codes.write().unwrap_or_else(PoisonError::into_inner).insert(code)
    }

    /// Remove code, returns `false` if absent.
    pub fn remove(&self, code: i32) -> bool {
        self.codes.write().unwrap_or_else(PoisonError::into_inner).remove(&code)
    }

    pub fn contains(&self, code: i32) -> bool {
        self.codes.read().unwrap_or_else(PoisonError::into_inner).contains(&code)
    }

    pub fn clear(&self) {
        self.codes.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Returns `true` if the exception of `err` carries a registered code.
    ///
    /// Server errors arrive as one flat exception, its code is the most specific entry of the
    /// status vector. An exception chain built with [`ExceptionBuilder::to_exception`] is
    /// checked entry by entry.
    ///
    /// [`ExceptionBuilder::to_exception`]: crate::exception::ExceptionBuilder::to_exception
    pub fn is_fatal(&self, err: &Error) -> bool {
        let Some(exception) = err.exception() else {
            return false;
        };
        let codes = self.codes.read().unwrap_or_else(PoisonError::into_inner);
        exception.iter().any(|e| codes.contains(&e.code()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exception::ExceptionBuilder;

    #[test]
    fn default_set() {
        let fatal = FatalErrors::default();
        assert!(fatal.contains(codes::BAD_DB_HANDLE));
        assert!(fatal.contains(codes::WRONG_ODS));
        assert!(!fatal.contains(codes::DSQL_ERROR));
    }

    #[test]
    fn shared_between_clones() {
        let fatal = FatalErrors::empty();
        let other = fatal.clone();
        assert!(fatal.insert(1));
        assert!(!other.insert(1));
        assert!(other.contains(1));
        assert!(other.remove(1));
        assert!(!fatal.contains(1));

        fatal.insert(2);
        other.clear();
        assert!(!fatal.contains(2));
    }

    #[test]
    fn matches_reported_code() {
        let fatal = FatalErrors::from_codes([codes::DSQL_RELATION_ERR]);
        let err = ExceptionBuilder::new()
            .exception(codes::DSQL_ERROR)
            .exception(codes::DSQL_RELATION_ERR)
            .into_error();
        assert!(fatal.is_fatal(&err));

        let err = ExceptionBuilder::new().exception(codes::DSQL_ERROR).into_error();
        assert!(!fatal.is_fatal(&err));
    }

    #[test]
    fn flat_exception_checks_chosen_code() {
        let fatal = FatalErrors::from_codes([codes::DSQL_ERROR]);
        let err = ExceptionBuilder::new()
            .exception(codes::DSQL_ERROR)
            .exception(codes::DSQL_RELATION_ERR)
            .into_error();
        assert_eq!(err.code(), Some(codes::DSQL_RELATION_ERR));
        assert!(!fatal.is_fatal(&err));

        let chain = ExceptionBuilder::new()
            .exception(codes::DSQL_ERROR)
            .exception(codes::DSQL_RELATION_ERR)
            .to_exception()
            .unwrap();
        assert!(fatal.is_fatal(&Error::from(chain)));
    }
}
