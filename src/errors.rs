//! Error types for Swift client operations.
//!
//! Every failure the crate can produce is a variant of [`Error`].  The
//! variant that callers branch on most is [`Error::UnexpectedStatus`],
//! which carries the full response; use [`is`] or [`Error::is_status`]
//! to test for one exact status code without destructuring it.

use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Swift client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A container name is empty, or an object name was given without
    /// a container name.
    #[error("missing container name")]
    NoContainerName,

    /// An object handle has an empty name.
    #[error("missing object name")]
    NoObjectName,

    /// A container name contains a slash.
    #[error("container name may not contain slashes")]
    MalformedContainerName,

    /// The service lacks the middleware an operation needs (bulk delete,
    /// archive extraction, static large objects).
    #[error("operation not supported by this Swift server")]
    NotSupported,

    /// A header name or value cannot be represented on the wire.
    #[error("invalid header {key}: {message}")]
    InvalidHeader { key: String, message: String },

    /// The service answered with a status code outside the accepted set.
    #[error(transparent)]
    UnexpectedStatus(Box<UnexpectedStatusError>),

    /// A response header could not be decoded into its typed field.
    #[error("bad header {key}: {source}")]
    MalformedHeader {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A response body (listing, manifest, bulk report) was not valid JSON
    /// of the expected shape.
    #[error("malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// A downloaded body was requested as a string but is not UTF-8.
    #[error("response body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The ETag returned for an upload does not match the MD5 of the bytes
    /// that were actually sent.
    #[error("Etag on uploaded object does not match MD5 checksum of uploaded data (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    /// A bulk operation completed with per-object or archive-level failures.
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// The HTTP client failed before a response was received.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// An I/O error while producing or consuming a body stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is an unexpected-status error for exactly `code`.
    pub fn is_status(&self, code: StatusCode) -> bool {
        self.status() == Some(code)
    }

    /// The actual response status, if this is an unexpected-status error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::UnexpectedStatus(e) => Some(e.status),
            _ => None,
        }
    }

    pub(crate) fn malformed_header<E>(key: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::MalformedHeader {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_header(key: &str, message: impl fmt::Display) -> Self {
        Error::InvalidHeader {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<UnexpectedStatusError> for Error {
    fn from(e: UnexpectedStatusError) -> Self {
        Error::UnexpectedStatus(Box::new(e))
    }
}

/// Checks if `err` is an unexpected-status error for that status code.
///
/// ```
/// use http::StatusCode;
/// use swiftkit::{is, Error};
///
/// fn ignore_missing(result: Result<(), Error>) -> Result<(), Error> {
///     match result {
///         Err(e) if is(&e, StatusCode::NOT_FOUND) => Ok(()),
///         other => other,
///     }
/// }
/// # assert!(ignore_missing(Ok(())).is_ok());
/// ```
///
/// Only a single exact code is matched; ranges such as "any 4xx" are
/// intentionally not supported.
pub fn is(err: &Error, code: StatusCode) -> bool {
    err.is_status(code)
}

/// A response whose status code was not in the accepted set.
#[derive(Debug)]
pub struct UnexpectedStatusError {
    /// Status codes that would have been accepted.
    pub expected: Vec<StatusCode>,
    /// The status code actually returned.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, truncated to a fixed bound.  Diagnostic only.
    pub body: Bytes,
}

impl fmt::Display for UnexpectedStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes = self
            .expected
            .iter()
            .map(|c| c.as_u16().to_string())
            .collect::<Vec<_>>()
            .join("/");
        write!(
            f,
            "expected {} response, got {} instead",
            codes,
            self.status.as_u16()
        )?;
        if !self.body.is_empty() {
            write!(f, ": {}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

impl std::error::Error for UnexpectedStatusError {}

/// Failure for a single object in a bulk operation.
///
/// Only produced as part of a [`BulkError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkObjectError {
    pub container_name: String,
    /// Empty when the failing entry was a container.
    pub object_name: String,
    pub status: StatusCode,
}

impl fmt::Display for BulkObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} {}",
            self.container_name,
            self.object_name,
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        )
    }
}

impl std::error::Error for BulkObjectError {}

/// Aggregate failure of a bulk delete, bulk upload or large-object
/// segment deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkError {
    /// Overall status code reported by the service for the operation.
    pub status: StatusCode,
    /// Archive-level error text.  May be empty.
    pub archive_error: String,
    /// Per-object failures.  May be empty.
    pub object_errors: Vec<BulkObjectError>,
}

/// Condenses the object errors into a count to stay on one line.
impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        )?;
        if !self.archive_error.is_empty() {
            write!(f, ": {}", self.archive_error)?;
        }
        if !self.object_errors.is_empty() {
            write!(f, " (+{} object errors)", self.object_errors.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkError {}

// -- Tests --------------------------------------------------------------------
