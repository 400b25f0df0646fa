//! Version store port (driven/secondary port)
//!
//! The version store owns the [`PathRecord`]s; the sync core reads them
//! for access and conflict decisions and writes them back when propagation
//! handlers receive ownership or sharing metadata. Concurrency is the
//! store's concern: reads-then-writes on the same path are assumed to be
//! serialized per path by the store.

use async_trait::async_trait;

use crate::domain::PathRecord;

/// Port trait for the external version store
#[async_trait]
pub trait IVersionStore: Send + Sync {
    /// The record for a path, if one exists
    async fn get_record(&self, path: &str) -> anyhow::Result<Option<PathRecord>>;

    /// Create or replace the record stored under `record.path`
    async fn write_record(&self, record: &PathRecord) -> anyhow::Result<()>;
}
