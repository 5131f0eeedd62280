//! Error primitives shared across the workspace.
//!
//! Typed errors live next to the code that raises them (as `snafu` enums). Anything that only needs to be reported,
//! such as the result of a worker body or a reload handler, is carried as a [`GenericError`].
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error with an optional chain of context.
pub type GenericError = anyhow::Error;

/// Builds a [`GenericError`].
///
/// Accepts a string literal, a format string followed by its arguments, or any value implementing `Debug` and
/// `Display`. When given an existing `std::error::Error`, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod sealed {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension methods for attaching context to a failed `Result`.
///
/// Named differently from `anyhow::Context` so that it can be imported alongside `snafu::ResultExt` without the two
/// `context` methods clashing.
pub trait ErrorContext<T, E>: sealed::Sealed {
    /// Wraps the error with the given context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error with context produced by `f`, which is only called on failure.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_to_the_chain() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk on fire"));
        let err = result.error_context("Failed to read configuration.").unwrap_err();

        assert_eq!(err.to_string(), "Failed to read configuration.");
        assert_eq!(err.root_cause().to_string(), "disk on fire");
    }

    #[test]
    fn lazy_context_is_not_evaluated_on_success() {
        let result: Result<u8, std::io::Error> = Ok(7);
        let value = result
            .with_error_context(|| -> String { panic!("context evaluated for a successful result") })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn macro_formats_arguments() {
        let err = generic_error!("worker '{}' failed", "reload");
        assert_eq!(err.to_string(), "worker 'reload' failed");
    }
}
