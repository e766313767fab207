//! Transcode Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A transcode error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transcode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Transform parameters are out of range. Fix the request.
    #[display("invalid transform parameters: {_0}")]
    InvalidParameters(#[error(not(source))] String),
    /// The cache path for a key escapes the cache directory.
    #[display("forbidden")]
    Forbidden,
    /// The worker could not produce output for this particular job. Other
    /// keys are unaffected.
    #[display("transcode failed: {_0}")]
    TranscodeFailed(#[error(not(source))] String),
    /// The worker died while the job was outstanding. A fresh worker is
    /// started on the next request.
    #[display("transcode worker failed: {_0}")]
    WorkerFatal(#[error(not(source))] String),
    /// Reading a cache file failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerFatal(_) | Self::Io)
    }
}
