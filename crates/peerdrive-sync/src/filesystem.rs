//! Disk storage adapter (secondary/driven adapter)
//!
//! Implements [`IStorage`] over `tokio::fs`, rooted at the synchronized
//! folder. All port paths are relative; this adapter is the only place
//! they meet the real filesystem.
//!
//! Checksums are hex-encoded SHA-256 over the full file content.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use peerdrive_core::ports::{IStorage, StorageKind};

/// Adapter that bridges the [`IStorage`] port to a directory on disk
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Create an adapter rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        found: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                found.push(self.relative(&entry_path));
                if entry.metadata().await?.is_dir() {
                    self.walk(entry_path, found).await?;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl IStorage for DiskStorage {
    async fn exists(&self, kind: StorageKind, path: &str) -> anyhow::Result<bool> {
        match tokio::fs::metadata(self.absolute(path)).await {
            Ok(metadata) => Ok(match kind {
                StorageKind::File => metadata.is_file(),
                StorageKind::Directory => metadata.is_dir(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        match tokio::fs::metadata(self.absolute(path)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn size(&self, path: &str) -> anyhow::Result<u64> {
        Ok(tokio::fs::metadata(self.absolute(path)).await?.len())
    }

    async fn read(&self, path: &str, offset: u64, len: u64) -> anyhow::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(self.absolute(path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut data = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn persist(
        &self,
        kind: StorageKind,
        path: &str,
        offset: u64,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let target = self.absolute(path);

        if kind == StorageKind::Directory {
            tokio::fs::create_dir_all(&target).await?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if bytes.is_empty() && offset > 0 {
            // no bytes to lay down; just make sure the file exists
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .await?;
            return Ok(());
        }

        if bytes.is_empty() {
            debug!(path, "truncating file");
            tokio::fs::File::create(&target).await?;
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&target)
            .await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let target = self.absolute(path);
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> anyhow::Result<()> {
        let target = self.absolute(new_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.absolute(old_path), target).await?;
        Ok(())
    }

    async fn checksum(&self, path: &str) -> anyhow::Result<String> {
        let data = tokio::fs::read(self.absolute(path)).await?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn list_contents(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let mut found = Vec::new();
        self.walk(self.absolute(path), &mut found).await?;
        found.sort();
        Ok(found)
    }
}
