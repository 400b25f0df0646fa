//! Conflict copies
//!
//! When the offer phase reports a concurrent divergent edit, neither
//! variant may silently win. The local version is preserved as a renamed
//! copy qualified with this device's identifier; the copy then re-enters
//! the pipeline as a synthetic create event and synchronizes
//! independently. No propagation happens for the conflicted exchange.

use std::path::Path;

use tracing::info;

use peerdrive_core::domain::EventKind;
use peerdrive_core::ports::{IStorage, StorageKind};
use peerdrive_proto::context::NodeContext;
use peerdrive_proto::share;

/// The conflict-copy name for `file_name` on the device tagged `device_tag`
///
/// `report.txt` on device `a1b2c3d4` becomes
/// `report (conflict copy a1b2c3d4).txt`.
pub fn conflict_copy_name(file_name: &str, device_tag: &str) -> String {
    match file_name.rfind('.').filter(|&i| i > 0) {
        Some(dot) => {
            let (stem, ext) = file_name.split_at(dot);
            format!("{stem} (conflict copy {device_tag}){ext}")
        }
        None => format!("{file_name} (conflict copy {device_tag})"),
    }
}

/// Materialize a conflict copy of `path` next to it
///
/// The copy's create is ignore-marked before the write; the orchestrator
/// re-injects a synthetic create event for the copy instead, so the copy
/// synchronizes as its own change. The name is uniquified if a previous
/// conflict of the same file still sits there. Returns the copy's
/// relative path.
pub async fn create_conflict_copy(ctx: &NodeContext, path: &str) -> anyhow::Result<String> {
    let size = ctx.storage.size(path).await?;
    let content = ctx.storage.read(path, 0, size).await?;

    let source = Path::new(path);
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    let copy_name = conflict_copy_name(&file_name, &ctx.device.device_id.short());

    let candidate = match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(&copy_name).to_string_lossy().into_owned()
        }
        _ => copy_name,
    };
    let target = share::unique_path(&ctx.storage, &candidate).await?;

    ctx.ignore.register(EventKind::Create, &target);
    ctx.storage
        .persist(StorageKind::File, &target, 0, &content)
        .await?;

    info!(original = %path, copy = %target, "conflict copy created");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_copy_name_with_extension() {
        assert_eq!(
            conflict_copy_name("report.txt", "a1b2c3d4"),
            "report (conflict copy a1b2c3d4).txt"
        );
    }

    #[test]
    fn test_conflict_copy_name_without_extension() {
        assert_eq!(
            conflict_copy_name("Makefile", "a1b2c3d4"),
            "Makefile (conflict copy a1b2c3d4)"
        );
    }

    #[test]
    fn test_conflict_copy_name_hidden_file() {
        assert_eq!(
            conflict_copy_name(".env", "a1b2c3d4"),
            ".env (conflict copy a1b2c3d4)"
        );
    }

    #[test]
    fn test_conflict_copy_name_multiple_dots() {
        assert_eq!(
            conflict_copy_name("archive.tar.gz", "ff00ff00"),
            "archive.tar (conflict copy ff00ff00).gz"
        );
    }
}
