//! Identifier map port (driven/secondary port)
//!
//! Maps durable file ids to local paths and back. Owners and sharers keep
//! the same file under different local paths; the id survives renames and
//! is how a remote request for "this file" is resolved to "our path".

use async_trait::async_trait;

use crate::domain::FileId;

/// Port trait for the file-id to local-path mapping
#[async_trait]
pub trait IIdentifierMap: Send + Sync {
    /// The local path registered for a file id, if any
    async fn resolve(&self, file_id: &FileId) -> anyhow::Result<Option<String>>;

    /// The file id registered for a local path, if any
    async fn lookup(&self, path: &str) -> anyhow::Result<Option<FileId>>;

    /// Register (or move) the mapping between a path and a file id
    async fn register(&self, path: &str, file_id: FileId) -> anyhow::Result<()>;
}
