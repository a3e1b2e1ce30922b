//! Error taxonomy shared by every layer of the engine.
//!
//! Errors are grouped by how the serving layer reacts to them, not by where
//! they originate:
//!
//! - [`Error::Parse`] - bad definition document; the resource never becomes active
//! - [`Error::NotFound`] - no valid data / unknown resource; answered as 404, never retried
//! - [`Error::Internal`] - contract violation or dead worker; answered as 500
//! - [`Error::Unavailable`] - resource is being prepared; client should retry later
//! - [`Error::Aborted`] - client went away, result is dropped
//!
//! Errors that travel from a warper worker back to the serving process are
//! flattened into a [`WireError`], which keeps the kind and the message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the generation and warping engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A definition document could not be parsed.
    #[error("Invalid value in `{field}`: {reason}")]
    Parse { field: String, reason: String },

    /// Requested data does not exist (no valid pixels, unknown resource, ...).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Programmer error or unexpected failure (variant mismatch, dead worker, ...).
    #[error("Internal error: {0}")]
    Internal(String),

    /// The resource is not ready yet.
    #[error("Resource <{0}> is being prepared, try again later")]
    Unavailable(String),

    /// The request was cancelled by the client.
    #[error("Request aborted")]
    Aborted,

    /// I/O error while reading or writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a parse error for the given field.
    pub fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Aborted => ErrorKind::Aborted,
            Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Returns true for "no data here" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true for internal errors (including I/O failures).
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// HTTP-equivalent status code a front end should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Parse => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Unavailable => 503,
            ErrorKind::Aborted => 499,
            ErrorKind::Internal => 500,
        }
    }
}

/// Coarse error classification, stable across the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Parse,
    NotFound,
    Internal,
    Unavailable,
    Aborted,
}

/// Serializable error sent by a warper worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::NotFound(msg) | Error::Internal(msg) | Error::Unavailable(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err.kind {
            ErrorKind::Parse => Error::Parse {
                field: "request".to_string(),
                reason: err.message,
            },
            ErrorKind::NotFound => Error::NotFound(err.message),
            ErrorKind::Internal => Error::Internal(err.message),
            ErrorKind::Unavailable => Error::Unavailable(err.message),
            ErrorKind::Aborted => Error::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_field() {
        let err = Error::parse("format", "unknown raster format `gif`");
        assert_eq!(
            err.to_string(),
            "Invalid value in `format`: unknown raster format `gif`"
        );
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: Error = std::io::Error::other("disk on fire").into();
        assert!(err.is_internal());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::Unavailable("r".into()).status_code(), 503);
        assert_eq!(Error::internal("x").status_code(), 500);
    }

    #[test]
    fn test_wire_error_keeps_kind_and_message() {
        let err = Error::not_found("No valid data.");
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::NotFound);
        assert_eq!(wire.message, "No valid data.");

        let back: Error = wire.into();
        assert!(back.is_not_found());
        assert_eq!(back.to_string(), "Not found: No valid data.");
    }
}
