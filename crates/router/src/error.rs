//! Router Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Every [`ErrorKind`] maps onto exactly
//! one HTTP status; see [`ErrorKind::status`].

use derive_more::{Display, Error};
use http::StatusCode;
use stash_library::error::{Error as LibraryError, ErrorKind as LibraryErrorKind};
use stash_transcode::error::{Error as TranscodeError, ErrorKind as TranscodeErrorKind};

/// A routing error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Unknown scheme or host, or a malformed query. Never worth retrying.
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    /// A path was rejected for escaping its root. Deliberately carries no
    /// detail so nothing about the filesystem leaks into a response.
    #[display("forbidden")]
    Forbidden,
    #[display("not found")]
    NotFound,
    /// The worker could not transcode this resource.
    #[display("transcode failed")]
    TranscodeFailed,
    /// The worker died. The next request gets a fresh one.
    #[display("transcode worker unavailable")]
    WorkerFatal,
    /// The router cannot be built from the given configuration.
    #[display("misconfigured: {_0}")]
    Misconfigured(#[error(not(source))] String),
    #[display("internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerFatal | Self::Internal)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::WorkerFatal => StatusCode::SERVICE_UNAVAILABLE,
            Self::TranscodeFailed | Self::Misconfigured(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[track_caller]
    pub(crate) fn library(err: LibraryError) -> Error {
        let kind = match &*err {
            LibraryErrorKind::NotFound(_) => Self::NotFound,
            LibraryErrorKind::Forbidden => Self::Forbidden,
            LibraryErrorKind::Storage => Self::Internal,
        };
        err.raise(kind)
    }

    #[track_caller]
    pub(crate) fn transcode(err: TranscodeError) -> Error {
        let kind = match &*err {
            TranscodeErrorKind::InvalidParameters(reason) => Self::InvalidRequest(reason.clone()),
            TranscodeErrorKind::Forbidden => Self::Forbidden,
            TranscodeErrorKind::TranscodeFailed(_) => Self::TranscodeFailed,
            TranscodeErrorKind::WorkerFatal(_) => Self::WorkerFatal,
            TranscodeErrorKind::Io => Self::Internal,
        };
        err.raise(kind)
    }
}
