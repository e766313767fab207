//! In-process catalog.

use crate::error::{ErrorKind, Result};
use crate::{Catalog, ResourceRecord, ResourceUpdate};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Catalog held entirely in memory.
///
/// Records live in a `HashMap` behind a [`RwLock`]. The catalog can be
/// switched "offline" with [`set_available`](Self::set_available) to
/// exercise degraded paths, and counts successful updates so callers can
/// verify how often they wrote back.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: RwLock<HashMap<String, ResourceRecord>>,
    offline: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryCatalog {
    pub fn with_records(records: impl IntoIterator<Item = ResourceRecord>) -> Self {
        let records = records.into_iter().map(|record| (record.id.clone(), record)).collect();
        Self { records: RwLock::new(records), ..Self::default() }
    }

    /// Seed a catalog from a JSON array of records.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let records: Vec<ResourceRecord> = serde_json::from_slice(json).or_raise(|| ErrorKind::InvalidData)?;
        tracing::debug!(records = records.len(), "Seeded in-memory catalog");
        Ok(Self::with_records(records))
    }

    /// Toggle whether the catalog answers requests at all.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of updates applied so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        match self.offline.load(Ordering::SeqCst) {
            true => exn::bail!(ErrorKind::Unavailable),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn read_resource(&self, id: &str) -> Result<Option<ResourceRecord>> {
        self.ensure_available()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_resource(&self, update: ResourceUpdate) -> Result<()> {
        self.ensure_available()?;
        let mut guard = self.records.write().await;
        let Some(record) = guard.get_mut(&update.id) else {
            exn::bail!(ErrorKind::NotFound(update.id));
        };
        if let Some(path) = update.stored_path {
            record.stored_path = Some(path);
        }
        record.updated_at = OffsetDateTime::now_utc();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
