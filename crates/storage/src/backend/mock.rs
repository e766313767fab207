//! In-memory storage backend for testing.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Renames are
/// counted so tests can assert how many moves a piece of code performed.
pub struct MockBackend {
    name: String,
    root: PathBuf,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    renames: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            root: PathBuf::from("/mock"),
            storage: RwLock::new(map),
            renames: AtomicUsize::new(0),
        }
    }

    /// Number of renames that actually moved a file.
    pub fn renames(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn full_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().await;
        if !guard.contains_key(&from) {
            exn::bail!(ErrorKind::NotFound(from));
        }
        if from == to {
            return Ok(());
        }
        if guard.contains_key(&to) {
            exn::bail!(ErrorKind::AlreadyExists(to));
        }
        if let Some(data) = guard.remove(&from) {
            guard.insert(to, data);
            self.renames.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (inserted, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_files() {
        let backend = MockBackend::with_files([
            ("123", Vec::from(*b"legacy")),
            ("img-124.png", Vec::from(*b"current")),
        ]);
        assert!(backend.exists(Path::new("123")).await.unwrap());
        assert!(backend.exists(Path::new("img-124.png")).await.unwrap());
        assert!(!backend.exists(Path::new("c/nope")).await.unwrap());
        assert_eq!(backend.read(Path::new("img-124.png")).await.unwrap(), b"current");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_counts_moves() {
        let backend = MockBackend::with_files([("old.txt", Vec::from(*b"data"))]);
        backend.rename(Path::new("old.txt"), Path::new("old.txt")).await.unwrap();
        assert_eq!(backend.renames(), 0);
        backend.rename(Path::new("old.txt"), Path::new("new.txt")).await.unwrap();
        assert_eq!(backend.renames(), 1);
        assert!(!backend.exists(Path::new("old.txt")).await.unwrap());
        assert_eq!(backend.read(Path::new("new.txt")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_never_replaces_destination() {
        let backend = MockBackend::with_files([("a", Vec::from(*b"a")), ("b", Vec::from(*b"b"))]);
        let err = backend.rename(Path::new("a"), Path::new("b")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(backend.read(Path::new("b")).await.unwrap(), b"b");
        assert_eq!(backend.renames(), 0);
    }

    #[tokio::test]
    async fn test_rename_not_found() {
        let backend = MockBackend::default();
        let err = backend.rename(Path::new("missing.txt"), Path::new("new.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat() {
        let backend = MockBackend::with_files([("file.png", Vec::from(*b"12345"))]);
        let info = backend.stat(Path::new("file.png")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file.png"));
        assert_eq!(info.size, 5);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("../etc/passwd")).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(backend.full_path(Path::new("../escape")).await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
