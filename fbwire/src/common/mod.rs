//! Crate internal macros.

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "verbose")]
            tracing::trace!($($tt)*);
        }
    };
}

/// Log warning when `log` feature enabled.
macro_rules! warn_ {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "log")]
            log::warn!($($tt)*);
        }
    };
}

/// Log error when `log` feature enabled.
macro_rules! error {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "log")]
            log::error!($($tt)*);
        }
    };
}

pub(crate) use verbose;
pub(crate) use warn_ as warn;
pub(crate) use error;
