//! Error types for parcomm.
//!
//! Every native entry point returns an integer status code. This module is
//! the single place where such a code turns into a Rust error: [`check`]
//! maps success to `Ok(())` and anything else to [`Error::Native`], carrying
//! the library's own description of the code.
//!
//! # Error Categories
//!
//! - **Native**: the library reported a failure. Not transient; nothing in
//!   this crate retries.
//! - **Misuse**: this crate detected an illegal use locally, such as copying
//!   a request that still has an operation in flight.
//!
//! Failures on drop paths cannot be returned to anyone. Those go through
//! [`escalate`], which logs the failure and aborts the process.

use crate::native::{codes, Native, ReturnCode, MAX_ERROR_STRING};
use thiserror::Error;

/// Errors surfaced by handle, request and communicator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The native library returned a non-success status code.
    #[error("{message}")]
    Native {
        /// The native status code.
        code: ReturnCode,
        /// The library's description of `code`.
        message: String,
    },

    /// This crate detected an illegal use of a handle or request.
    #[error("{0}")]
    Misuse(String),
}

impl Error {
    /// Build a native failure, asking the library to describe `code`.
    pub fn from_code(native: &dyn Native, code: ReturnCode) -> Self {
        Self::Native {
            code,
            message: describe(native, code),
        }
    }

    /// Build a failure from a message, for misuse detected by this crate.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse(message.into())
    }

    /// The native status code, if this failure came from the library.
    pub const fn code(&self) -> Option<ReturnCode> {
        match self {
            Self::Native { code, .. } => Some(*code),
            Self::Misuse(_) => None,
        }
    }

    /// Whether this failure was detected locally.
    pub const fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Route a native status code through the error channel.
pub fn check(native: &dyn Native, code: ReturnCode) -> Result<()> {
    if code == codes::SUCCESS {
        return Ok(());
    }
    Err(Error::from_code(native, code))
}

fn describe(native: &dyn Native, code: ReturnCode) -> String {
    let mut buf = [0u8; MAX_ERROR_STRING];
    let mut resultlen = 0usize;
    if native.error_string(code, &mut buf, &mut resultlen) != codes::SUCCESS {
        return format!("unknown error code {code}");
    }
    let text = &buf[..resultlen.min(MAX_ERROR_STRING)];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    String::from_utf8_lossy(&text[..end]).into_owned()
}

/// Escalate a failure that happened while releasing a resource on a drop path.
///
/// Drop cannot return a failure and silently continuing would leak the
/// native resource or leave the library writing into freed memory, so the
/// process is aborted after the failure is logged.
#[cold]
pub(crate) fn escalate(context: &'static str, error: &Error) -> ! {
    tracing::error!(context, %error, "fatal failure while releasing a native resource");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubNative;

    #[test]
    fn success_code_is_ok() {
        let native = StubNative::new();
        assert_eq!(check(&native, codes::SUCCESS), Ok(()));
    }

    #[test]
    fn failure_code_carries_library_text() {
        let native = StubNative::new();
        let error = check(&native, codes::ERR_COMM).unwrap_err();

        assert_eq!(error.code(), Some(codes::ERR_COMM));
        assert!(!error.is_misuse());
        assert!(error.to_string().contains("invalid communicator"));
    }

    #[test]
    fn misuse_has_no_code() {
        let error = Error::misuse("copied a live request");
        assert_eq!(error.code(), None);
        assert!(error.is_misuse());
        assert_eq!(error.to_string(), "copied a live request");
    }

    #[test]
    fn undescribable_codes_fall_back_to_a_generic_message() {
        let native = StubNative::new();
        let error = Error::from_code(&native, 4242);
        assert_eq!(error.to_string(), "unknown error code 4242");
    }
}
