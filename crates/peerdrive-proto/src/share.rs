//! Shared-path resolution
//!
//! When a file is created inside a folder another user shared with us,
//! the pushing side addresses it by *its* path and a durable file id we
//! have never seen. The receiver must then synthesize a local destination
//! under its own shared-folder root (read-write or read-only, depending
//! on the capability it was granted) and register the id→path mapping
//! before writing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use peerdrive_core::ports::{IStorage, IVersionStore, StorageKind};

/// The offered path relative to the shared folder owned by `owner`
///
/// Walks the path's ancestors from the deepest up, looking for one whose
/// record marks it as shared by `owner`; the returned path keeps that
/// ancestor as its first component. Falls back to the bare file name when
/// no shared ancestor is on record.
pub async fn relative_in_shared_folder(
    version_store: &Arc<dyn IVersionStore>,
    path: &str,
    owner: &str,
) -> anyhow::Result<String> {
    let mut ancestor = Some(Path::new(path));
    while let Some(current) = ancestor {
        let current_str = current.to_string_lossy();
        if !current_str.is_empty() {
            if let Some(record) = version_store.get_record(&current_str).await? {
                if record.is_shared && record.owner.as_deref() == Some(owner) {
                    let shared_parent = current.parent().unwrap_or_else(|| Path::new(""));
                    let rel = Path::new(path)
                        .strip_prefix(shared_parent)
                        .unwrap_or_else(|_| Path::new(path));
                    return Ok(rel.to_string_lossy().into_owned());
                }
            }
        }
        ancestor = current.parent();
    }

    Ok(Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string()))
}

/// Place `relative` under the shared root, dropping vanished parents
///
/// If the relative path has intermediate directories that do not exist
/// under the root (anymore), the file lands at the root of the shared
/// folder instead.
pub async fn destination_under_root(
    storage: &Arc<dyn IStorage>,
    root: &str,
    relative: &str,
) -> anyhow::Result<String> {
    let rel = Path::new(relative);
    let components = rel.components().count();

    if components > 1 {
        let parent = PathBuf::from(root).join(rel.parent().unwrap_or_else(|| Path::new("")));
        let parent_str = parent.to_string_lossy();
        if !storage.exists(StorageKind::Directory, &parent_str).await? {
            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative.to_string());
            return Ok(PathBuf::from(root).join(name).to_string_lossy().into_owned());
        }
    }

    Ok(PathBuf::from(root).join(rel).to_string_lossy().into_owned())
}

/// A path at `candidate` that does not collide with anything on disk
///
/// Appends " (2)", " (3)", ... before the extension until the name is
/// free. The first candidate is returned unchanged when it is available.
pub async fn unique_path(storage: &Arc<dyn IStorage>, candidate: &str) -> anyhow::Result<String> {
    if !occupied(storage, candidate).await? {
        return Ok(candidate.to_string());
    }

    let (stem, ext) = split_extension(candidate);
    let mut counter = 2u32;
    loop {
        let numbered = format!("{stem} ({counter}){ext}");
        if !occupied(storage, &numbered).await? {
            return Ok(numbered);
        }
        counter += 1;
    }
}

async fn occupied(storage: &Arc<dyn IStorage>, path: &str) -> anyhow::Result<bool> {
    Ok(storage.exists(StorageKind::File, path).await?
        || storage.exists(StorageKind::Directory, path).await?)
}

fn split_extension(path: &str) -> (&str, &str) {
    match Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| name.rfind('.').filter(|&i| i > 0))
    {
        Some(dot_in_name) => {
            let name_start = path.len()
                - Path::new(path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::len)
                    .unwrap_or(0);
            let split = name_start + dot_in_name;
            (&path[..split], &path[split..])
        }
        None => (path, ""),
    }
}

#[cfg(test)]
mod tests {
    use peerdrive_core::domain::PathRecord;

    use super::*;
    use crate::testing::{MemoryStorage, MemoryVersionStore};

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("dir/report.txt"), ("dir/report", ".txt"));
        assert_eq!(split_extension("dir/Makefile"), ("dir/Makefile", ""));
        assert_eq!(split_extension("dir/.hidden"), ("dir/.hidden", ""));
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
    }

    #[tokio::test]
    async fn test_unique_path_returns_free_candidate() {
        let storage: Arc<dyn IStorage> = Arc::new(MemoryStorage::new());
        let unique = unique_path(&storage, "docs/a.txt").await.unwrap();
        assert_eq!(unique, "docs/a.txt");
    }

    #[tokio::test]
    async fn test_unique_path_numbers_collisions() {
        let storage = Arc::new(MemoryStorage::new());
        let dyn_storage: Arc<dyn IStorage> = storage.clone();
        dyn_storage
            .persist(StorageKind::File, "docs/a.txt", 0, b"x")
            .await
            .unwrap();
        dyn_storage
            .persist(StorageKind::File, "docs/a (2).txt", 0, b"x")
            .await
            .unwrap();

        let unique = unique_path(&dyn_storage, "docs/a.txt").await.unwrap();
        assert_eq!(unique, "docs/a (3).txt");
    }

    #[tokio::test]
    async fn test_relative_in_shared_folder_finds_shared_ancestor() {
        let store = Arc::new(MemoryVersionStore::new());
        let mut record = PathRecord::new("projects/shared", "alice");
        record.is_shared = true;
        store.put(record);

        let dyn_store: Arc<dyn IVersionStore> = store;
        let rel = relative_in_shared_folder(&dyn_store, "projects/shared/sub/f.txt", "alice")
            .await
            .unwrap();
        assert_eq!(rel, "shared/sub/f.txt");
    }

    #[tokio::test]
    async fn test_relative_in_shared_folder_falls_back_to_name() {
        let dyn_store: Arc<dyn IVersionStore> = Arc::new(MemoryVersionStore::new());
        let rel = relative_in_shared_folder(&dyn_store, "somewhere/deep/f.txt", "alice")
            .await
            .unwrap();
        assert_eq!(rel, "f.txt");
    }

    #[tokio::test]
    async fn test_destination_under_root_drops_vanished_parent() {
        let dyn_storage: Arc<dyn IStorage> = Arc::new(MemoryStorage::new());
        let dest = destination_under_root(&dyn_storage, "rw-shares", "shared/sub/f.txt")
            .await
            .unwrap();
        assert_eq!(dest, "rw-shares/f.txt");
    }

    #[tokio::test]
    async fn test_destination_under_root_keeps_existing_parent() {
        let storage = Arc::new(MemoryStorage::new());
        let dyn_storage: Arc<dyn IStorage> = storage.clone();
        dyn_storage
            .persist(StorageKind::Directory, "rw-shares/shared/sub", 0, &[])
            .await
            .unwrap();

        let dest = destination_under_root(&dyn_storage, "rw-shares", "shared/sub/f.txt")
            .await
            .unwrap();
        assert_eq!(dest, "rw-shares/shared/sub/f.txt");
    }
}
