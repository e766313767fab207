//! Path-safe access to the resource library on disk.
//!
//! Every filesystem-facing operation in stash goes through [`resolve_path`]
//! (directly, or via a [`StorageBackend`]) so that nothing outside the
//! configured base directory can be read, written or renamed.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::{resolve as resolve_path, validate as validate_path};
use std::sync::Arc;

/// Name of the subdirectory of the library holding transcoded outputs. No
/// resource may live under it.
pub const CACHE_DIR: &str = "cache";

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
