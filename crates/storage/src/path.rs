//! Path validation and containment.
//!
//! [`validate`] normalizes relative storage paths lexically, and [`resolve`]
//! anchors a candidate path to a base directory, additionally checking the
//! canonical (symlink-resolved) location so that links inside the base
//! cannot be used to reach files outside of it. The canonical check touches
//! the filesystem, so [`resolve`] is async and goes through `tokio::fs`.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use stash_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("cache/123_quality-70").is_ok());
/// assert!(validate_path("a/../img-1.png").is_ok()); // (never leaves the base)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././cache//./123/").unwrap(),
///     Path::new("cache/123")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let normalized = normalize(path.as_ref())?;
    match normalized.as_os_str().is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(normalized),
    }
}

/// Lexical normalization shared by [`validate`] and [`resolve`]. An empty
/// result means "the root itself".
fn normalize(path: &Path) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling. Means we
    // don't have to deal with non-UTF8, or the maniacs on Unix that use
    // backslashes in their filenames.
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Resolves `candidate` against the `base` directory, guaranteeing the result
/// is equal to or nested under `base`.
///
/// - Relative candidates are interpreted relative to `base`.
/// - Absolute candidates must already lie (lexically) under `base`; an
///   absolute path anywhere else is rejected rather than re-rooted.
/// - `..` components may never climb above `base`.
/// - The deepest existing ancestor of the result is canonicalized and must
///   still be inside the canonical `base`, which catches symlinks pointing
///   out of the library. Dangling symlinks are rejected outright since
///   writing through them would create files wherever they point.
///
/// Rejections are reported as [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
/// The function never creates, modifies or deletes anything.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use stash_storage::resolve_path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let base = Path::new("/nonexistent/stash/library");
/// assert_eq!(
///     resolve_path(base, "cache/123").await.unwrap(),
///     Path::new("/nonexistent/stash/library/cache/123"),
/// );
/// assert!(resolve_path(base, base.join("../../etc/passwd")).await.is_err());
/// assert!(resolve_path(base, "/etc/passwd").await.is_err());
/// # }
/// ```
pub async fn resolve(base: impl AsRef<Path>, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let (base, resolved) = anchor(base.as_ref(), candidate.as_ref())?;
    ensure_contained(&base, &resolved).await?;
    Ok(resolved)
}

/// The lexical half of [`resolve`]: returns the normalized base and the
/// candidate joined onto it.
fn anchor(base: &Path, candidate: &Path) -> Result<(PathBuf, PathBuf)> {
    if !base.is_absolute() {
        exn::bail!(ErrorKind::InvalidPath(base.to_path_buf()));
    }
    let base = normalize_absolute(base)?;
    let relative = match candidate.is_absolute() {
        true => {
            let candidate = normalize_absolute(candidate)?;
            match candidate.strip_prefix(&base) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => exn::bail!(ErrorKind::InvalidPath(candidate)),
            }
        },
        false => normalize(candidate)?,
    };
    let resolved = match relative.as_os_str().is_empty() {
        true => base.clone(),
        false => base.join(&relative),
    };
    Ok((base, resolved))
}

/// Lexically normalizes an absolute path, keeping its root. Climbing above
/// the filesystem root is an error.
fn normalize_absolute(path: &Path) -> Result<PathBuf> {
    let relative = normalize(path)?;
    let mut root = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => root.push(component.as_os_str()),
            _ => break,
        }
    }
    Ok(root.join(relative))
}

async fn ensure_contained(base: &Path, resolved: &Path) -> Result<()> {
    let canonical_base = match fs::canonicalize(base).await {
        Ok(canonical) => canonical,
        // Nothing exists yet, so there is no symlink that could escape.
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    let mut probe = resolved;
    loop {
        match fs::canonicalize(probe).await {
            Ok(real) if real.starts_with(&canonical_base) => return Ok(()),
            Ok(_) => {
                tracing::debug!(path = %resolved.display(), "Path escapes base directory through a symlink");
                exn::bail!(ErrorKind::InvalidPath(resolved.to_path_buf()));
            },
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                if fs::symlink_metadata(probe).await.is_ok() {
                    tracing::debug!(path = %probe.display(), "Refusing to follow dangling symlink");
                    exn::bail!(ErrorKind::InvalidPath(resolved.to_path_buf()));
                }
                match probe.parent() {
                    Some(parent) if parent.starts_with(base) => probe = parent,
                    _ => return Ok(()),
                }
            },
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        }
    }
}
