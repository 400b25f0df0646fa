//! Storage port (driven/secondary port)
//!
//! Interface to the synchronized folder. All paths are strings relative
//! to the synchronized root; the adapter decides where that root lives.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - `persist` writes at a byte offset so chunked transfers can lay a file
//!   down piecewise; writing an empty slice at offset 0 truncates the file.
//! - `checksum` is only defined for files; directories have none.

use async_trait::async_trait;

/// Whether a path denotes a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Directory,
}

/// Port trait for synchronized-folder I/O
#[async_trait]
pub trait IStorage: Send + Sync {
    /// Whether a path exists as the given kind
    async fn exists(&self, kind: StorageKind, path: &str) -> anyhow::Result<bool>;

    /// Whether an existing path is a directory
    async fn is_dir(&self, path: &str) -> anyhow::Result<bool>;

    /// Size of a file in bytes
    async fn size(&self, path: &str) -> anyhow::Result<u64>;

    /// Read up to `len` bytes starting at `offset`
    ///
    /// Returns fewer bytes at end of file, and an empty vector when
    /// `offset` is at or beyond the end.
    async fn read(&self, path: &str, offset: u64, len: u64) -> anyhow::Result<Vec<u8>>;

    /// Write `bytes` at `offset`, creating the file and its parents as needed
    ///
    /// For directories, `offset` and `bytes` are ignored and the directory
    /// chain is created. Writing an empty slice at offset 0 truncates an
    /// existing file; an empty slice at any other offset is a no-op.
    async fn persist(
        &self,
        kind: StorageKind,
        path: &str,
        offset: u64,
        bytes: &[u8],
    ) -> anyhow::Result<()>;

    /// Delete a file, or a directory and everything below it
    async fn delete(&self, path: &str) -> anyhow::Result<()>;

    /// Rename a file or directory
    async fn rename(&self, old_path: &str, new_path: &str) -> anyhow::Result<()>;

    /// Hex-encoded checksum of a file's full content
    async fn checksum(&self, path: &str) -> anyhow::Result<String>;

    /// All descendant paths of a directory, relative to the synchronized root
    async fn list_contents(&self, path: &str) -> anyhow::Result<Vec<String>>;
}
