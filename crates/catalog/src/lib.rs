//! Resource catalog port.
//!
//! The catalog is the source of truth for which resources exist, what kind
//! they are and where their backing file was last known to live. Stash only
//! ever reads records and, after migrating a file to the current naming
//! scheme, asks the catalog to remember the new location.
//!
//! [`MemoryCatalog`] is a complete in-process implementation, used by the
//! command line front end (seeded from JSON) and throughout the tests.

pub mod error;
mod memory;
mod models;

pub use crate::memory::MemoryCatalog;
pub use crate::models::{ResourceKind, ResourceRecord, ResourceUpdate};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub type CatalogHandle = Arc<dyn Catalog + Send + Sync>;

/// Read/update access to resource records.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a record by id. `Ok(None)` means the catalog is reachable but
    /// has never heard of the resource.
    async fn read_resource(&self, id: &str) -> Result<Option<ResourceRecord>>;

    /// Persist a partial update of an existing record.
    async fn update_resource(&self, update: ResourceUpdate) -> Result<()>;
}
