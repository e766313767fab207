//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use stash_storage::error::Error as StorageError;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No file exists for the resource under any known layout.
    #[display("resource not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A candidate path resolved outside of the library.
    #[display("forbidden")]
    Forbidden,
    /// A storage backend operation failed.
    #[display("storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }

    /// Raise a storage error, keeping path-safety rejections distinguishable
    /// from every other failure.
    #[track_caller]
    pub(crate) fn storage(err: StorageError) -> Error {
        match err.is_forbidden() {
            true => err.raise(ErrorKind::Forbidden),
            false => err.raise(ErrorKind::Storage),
        }
    }
}
