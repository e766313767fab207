use crate::error::{ErrorKind, Result};
use crate::naming::{current_path, has_expected_extension, is_reserved, legacy_path};
use exn::ResultExt;
use stash_catalog::{CatalogHandle, ResourceRecord, ResourceUpdate};
use stash_storage::BackendHandle;
use stash_storage::error::ErrorKind as StorageErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::instrument;

/// A resource file that was found, and its contents.
#[derive(Debug)]
pub struct Located {
    pub bytes: Vec<u8>,
    /// Path relative to [`base`](Self::base), as understood by the backend.
    pub path: PathBuf,
    /// Absolute path after path-safety checks.
    pub full_path: PathBuf,
    pub base: PathBuf,
    pub modified: OffsetDateTime,
    /// Which strategy found the file.
    pub strategy: Strategy,
    /// The migration performed while locating, if any.
    pub migration: Option<Migration>,
}

/// A move of a resource file into the current naming scheme.
///
/// `from == to` when the file was already in place and only the catalog
/// record was stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Whether the catalog accepted the new stored path. A `false` here is
    /// harmless: the next lookup notices the stale record and tries again.
    pub catalog_updated: bool,
}

/// Ways of finding a resource's file, in order of precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The path the catalog recorded, if it carries a trusted extension.
    StoredPath,
    /// `<prefix>-<slug>.<ext>` derived from the record.
    CurrentScheme,
    /// The bare resource id.
    Legacy,
}
impl Strategy {
    pub const ORDER: [Strategy; 3] = [Self::StoredPath, Self::CurrentScheme, Self::Legacy];
}

enum Probe {
    Found(Located),
    Missing,
}

/// Resolves resource ids to files in a storage backend.
#[derive(Clone)]
pub struct Locator {
    backend: BackendHandle,
    catalog: CatalogHandle,
}

impl Locator {
    pub fn new(backend: BackendHandle, catalog: CatalogHandle) -> Self {
        Self { backend, catalog }
    }

    /// Find and read the file backing `id`.
    ///
    /// Without a record only the legacy layout can be probed, and nothing is
    /// migrated since there is no kind to name the file by. Deleted records
    /// are never served.
    ///
    /// # Errors
    /// - [`ErrorKind::NotFound`] when no strategy finds a file.
    /// - [`ErrorKind::Forbidden`] as soon as any candidate path escapes the
    ///   base directory; the remaining strategies are not tried.
    /// - [`ErrorKind::Storage`] for any other backend failure.
    #[instrument(skip(self, record), fields(backend = self.backend.name()))]
    pub async fn locate(&self, id: &str, record: Option<&ResourceRecord>) -> Result<Located> {
        if record.is_some_and(|record| record.deleted) {
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }
        for strategy in Strategy::ORDER {
            match self.probe(strategy, id, record).await? {
                Probe::Found(located) => {
                    tracing::debug!(?strategy, path = %located.path.display(), "Located resource");
                    return Ok(located);
                },
                Probe::Missing => continue,
            }
        }
        exn::bail!(ErrorKind::NotFound(id.to_string()))
    }

    async fn probe(&self, strategy: Strategy, id: &str, record: Option<&ResourceRecord>) -> Result<Probe> {
        match (strategy, record) {
            (Strategy::StoredPath, Some(record)) => self.probe_stored(record).await,
            (Strategy::CurrentScheme, Some(record)) => self.probe_current(record).await,
            (Strategy::Legacy, record) => self.probe_legacy(id, record).await,
            (_, None) => Ok(Probe::Missing),
        }
    }

    async fn probe_stored(&self, record: &ResourceRecord) -> Result<Probe> {
        let Some(stored) = record.stored_path.as_deref().map(Path::new) else {
            return Ok(Probe::Missing);
        };
        if !has_expected_extension(stored, record.kind) || is_reserved(stored) {
            return Ok(Probe::Missing);
        }
        match self.read(stored).await? {
            Some(bytes) => Ok(Probe::Found(self.located(stored, bytes, Strategy::StoredPath, None).await?)),
            None => Ok(Probe::Missing),
        }
    }

    async fn probe_current(&self, record: &ResourceRecord) -> Result<Probe> {
        let target = current_path(record);
        let Some(bytes) = self.read(&target).await? else {
            return Ok(Probe::Missing);
        };
        let migration = match self.is_recorded(record, &target).await {
            true => None,
            false => Some(self.record_location(record, target.clone(), target.clone()).await),
        };
        Ok(Probe::Found(self.located(&target, bytes, Strategy::CurrentScheme, migration).await?))
    }

    async fn probe_legacy(&self, id: &str, record: Option<&ResourceRecord>) -> Result<Probe> {
        let legacy = legacy_path(id);
        if is_reserved(&legacy) || !self.is_file(&legacy).await? {
            return Ok(Probe::Missing);
        }
        let Some(record) = record else {
            return self.read_found(&legacy, Strategy::Legacy, None).await;
        };
        let target = current_path(record);
        // Move first and read from the new home afterwards, so a failing
        // catalog update can never strand the file. The backend refuses to
        // replace an existing destination.
        match self.backend.rename(&legacy, &target).await {
            Ok(()) => {
                tracing::info!(id, from = %legacy.display(), to = %target.display(), "Migrated legacy resource file");
                let migration = self.record_location(record, legacy, target.clone()).await;
                self.read_found(&target, Strategy::Legacy, Some(migration)).await
            },
            Err(err) if err.is_forbidden() => Err(ErrorKind::storage(err)),
            Err(err) => {
                tracing::warn!(id, error = ?err, "Could not migrate legacy resource file; serving it in place");
                self.read_found(&legacy, Strategy::Legacy, None).await
            },
        }
    }

    async fn read_found(&self, path: &Path, strategy: Strategy, migration: Option<Migration>) -> Result<Probe> {
        match self.read(path).await? {
            Some(bytes) => Ok(Probe::Found(self.located(path, bytes, strategy, migration).await?)),
            None => Ok(Probe::Missing),
        }
    }

    /// Tell the catalog where the file lives now. Failures are logged only.
    async fn record_location(&self, record: &ResourceRecord, from: PathBuf, to: PathBuf) -> Migration {
        let update = ResourceUpdate::stored_path(&record.id, to.to_string_lossy());
        let catalog_updated = match self.catalog.update_resource(update).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(id = %record.id, error = ?err, "Failed to record migrated resource location");
                false
            },
        };
        Migration { from, to, catalog_updated }
    }

    /// Whether the record's stored path already points at `target`.
    async fn is_recorded(&self, record: &ResourceRecord, target: &Path) -> bool {
        let Some(stored) = record.stored_path.as_deref() else {
            return false;
        };
        match (self.backend.full_path(Path::new(stored)).await, self.backend.full_path(target).await) {
            (Ok(stored), Ok(target)) => stored == target,
            _ => false,
        }
    }

    /// Whether `path` is a regular file. Directories never back a resource.
    async fn is_file(&self, path: &Path) -> Result<bool> {
        match self.backend.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(ErrorKind::storage(err)),
        }
    }

    /// Read a file, mapping "not found" to `None`.
    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.backend.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => Ok(None),
            Err(err) => Err(ErrorKind::storage(err)),
        }
    }

    async fn located(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        strategy: Strategy,
        migration: Option<Migration>,
    ) -> Result<Located> {
        let full_path = self.backend.full_path(path).await.map_err(ErrorKind::storage)?;
        let modified = self.backend.stat(path).await.or_raise(|| ErrorKind::Storage)?.modified;
        Ok(Located {
            bytes,
            path: path.to_path_buf(),
            full_path,
            base: self.backend.root().to_path_buf(),
            modified,
            strategy,
            migration,
        })
    }
}
