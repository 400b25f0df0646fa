//! Access gate
//!
//! A pure capability predicate over a path's ownership/sharing record.
//! The owner always passes; everyone else needs a sharer entry at or
//! above the requested capability. No side effects, no caching beyond
//! whatever the version store currently says.

use std::sync::Arc;

use tracing::debug;

use crate::domain::AccessType;
use crate::ports::IVersionStore;

/// Capability checks against the version store's path records
#[derive(Clone)]
pub struct AccessGate {
    version_store: Arc<dyn IVersionStore>,
}

impl AccessGate {
    pub fn new(version_store: Arc<dyn IVersionStore>) -> Self {
        Self { version_store }
    }

    /// Whether `username` holds at least `capability` on `path`
    ///
    /// A path without a record grants nothing.
    pub async fn has_access(
        &self,
        username: &str,
        capability: AccessType,
        path: &str,
    ) -> anyhow::Result<bool> {
        let Some(record) = self.version_store.get_record(path).await? else {
            debug!(path, username, "no record for path, denying access");
            return Ok(false);
        };

        if record.owner.as_deref() == Some(username) {
            return Ok(true);
        }

        Ok(record
            .sharer_access(username)
            .is_some_and(|granted| granted >= capability))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{PathRecord, Sharer};

    #[derive(Default)]
    struct StubVersionStore {
        records: Mutex<HashMap<String, PathRecord>>,
    }

    #[async_trait]
    impl IVersionStore for StubVersionStore {
        async fn get_record(&self, path: &str) -> anyhow::Result<Option<PathRecord>> {
            Ok(self.records.lock().unwrap().get(path).cloned())
        }

        async fn write_record(&self, record: &PathRecord) -> anyhow::Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.path.clone(), record.clone());
            Ok(())
        }
    }

    async fn gate_with(record: PathRecord) -> AccessGate {
        let store = Arc::new(StubVersionStore::default());
        store.write_record(&record).await.unwrap();
        AccessGate::new(store)
    }

    #[tokio::test]
    async fn test_owner_always_allowed() {
        let gate = gate_with(PathRecord::new("a.txt", "alice")).await;
        assert!(gate
            .has_access("alice", AccessType::Write, "a.txt")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_write_sharer_covers_read() {
        let mut record = PathRecord::new("a.txt", "alice");
        record.add_sharer(Sharer::new("bob", AccessType::Write));
        let gate = gate_with(record).await;

        assert!(gate
            .has_access("bob", AccessType::Read, "a.txt")
            .await
            .unwrap());
        assert!(gate
            .has_access("bob", AccessType::Write, "a.txt")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_read_sharer_denied_write() {
        let mut record = PathRecord::new("a.txt", "alice");
        record.add_sharer(Sharer::new("bob", AccessType::Read));
        let gate = gate_with(record).await;

        assert!(!gate
            .has_access("bob", AccessType::Write, "a.txt")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stranger_denied() {
        let gate = gate_with(PathRecord::new("a.txt", "alice")).await;
        assert!(!gate
            .has_access("mallory", AccessType::Read, "a.txt")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_path_denied() {
        let gate = AccessGate::new(Arc::new(StubVersionStore::default()));
        assert!(!gate
            .has_access("alice", AccessType::Read, "ghost.txt")
            .await
            .unwrap());
    }
}
