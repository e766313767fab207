//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local filesystem.
//! Files are stored in a configured directory and accessed using standard filesystem
//! operations via `tokio::fs` for async I/O.

use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::resolve as resolve_path};
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use stash_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("library", "/path/to/resources")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for the library
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// The root is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on library initialization
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }

        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    async fn absolute_path(&self, path: &Path) -> Result<PathBuf> {
        resolve_path(&self.root, path).await
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn full_path(&self, path: &Path) -> Result<PathBuf> {
        self.absolute_path(path).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path).await?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path).await?;
        Ok(fs::read(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from).await?;
        let to_path = self.absolute_path(to).await?;
        if from_path == to_path {
            return Ok(());
        }
        if fs::try_exists(&to_path).await.map_err(|e| ErrorKind::from_io(e, to))? {
            exn::bail!(ErrorKind::AlreadyExists(to.to_path_buf()));
        }
        // Create parent directories for destination if needed
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, to))?;
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| ErrorKind::from_io(e, from))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path).await?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        assert!(LocalBackend::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/library");
        LocalBackend::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_full_path() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("cache/123");
        assert_eq!(backend.full_path(Path::new("cache/123")).await.unwrap(), expected);
        // Path traversal is prevented
        assert!(backend.full_path(Path::new("../etc/passwd")).await.is_err());
    }

    #[tokio::test]
    async fn test_read() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("test.txt"), b"Hello, world!").unwrap();
        let read_data = backend.read(Path::new("test.txt")).await.unwrap();
        assert_eq!(read_data, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let (_temp_dir, backend) = backend();
        let err = backend.read(Path::new("missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_exists() {
        let (temp_dir, backend) = backend();
        assert!(!backend.exists(Path::new("nonexistent.txt")).await.unwrap());
        std::fs::write(temp_dir.path().join("exists.txt"), b"data").unwrap();
        assert!(backend.exists(Path::new("exists.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("123"), b"data").unwrap();
        backend.rename(Path::new("123"), Path::new("img-123.png")).await.unwrap();
        assert!(!backend.exists(Path::new("123")).await.unwrap());
        assert_eq!(backend.read(Path::new("img-123.png")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_onto_itself() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("img-1.png"), b"data").unwrap();
        backend.rename(Path::new("img-1.png"), Path::new("./img-1.png")).await.unwrap();
        assert_eq!(backend.read(Path::new("img-1.png")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_creates_directories() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("file.txt"), b"data").unwrap();
        backend.rename(Path::new("file.txt"), Path::new("a/b/c/file.txt")).await.unwrap();
        assert!(backend.exists(Path::new("a/b/c/file.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_never_replaces_destination() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("123"), b"legacy").unwrap();
        std::fs::write(temp_dir.path().join("img-123.png"), b"current").unwrap();
        let err = backend.rename(Path::new("123"), Path::new("img-123.png")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(backend.read(Path::new("123")).await.unwrap(), b"legacy");
        assert_eq!(backend.read(Path::new("img-123.png")).await.unwrap(), b"current");
    }

    #[tokio::test]
    async fn test_rename_not_found() {
        let (_temp_dir, backend) = backend();
        let err = backend.rename(Path::new("missing"), Path::new("new")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join("file.txt"), b"Hello, world!").unwrap();
        let info = backend.stat(Path::new("file.txt")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file.txt"));
        assert_eq!(info.size, 13);
    }

    #[tokio::test]
    async fn test_stat_directory_is_not_a_file() {
        let (temp_dir, backend) = backend();
        std::fs::create_dir(temp_dir.path().join("dir")).unwrap();
        let err = backend.stat(Path::new("dir")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_temp_dir, backend) = backend();
        // Attempts to escape the root should fail, and fail as forbidden.
        let err = backend.read(Path::new("../etc/passwd")).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(backend.read(Path::new("etc/../../passwd")).await.is_err());
        assert!(backend.read(Path::new("/etc/passwd")).await.is_err());
        assert!(backend.rename(Path::new("../../file"), Path::new("file")).await.is_err());
    }
}
