//! Path ownership and sharing records
//!
//! A [`PathRecord`] is the version-store entry for one synchronized path.
//! It carries who owns the path, who it is shared with and at which
//! capability, and the history of content versions. The record itself is
//! stored and owned by the external version store; the sync core reads it
//! for access decisions and updates it when propagation handlers receive
//! ownership or sharing metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::VersionHash;

/// Capability level a user holds on a path
///
/// Ordered so that `Write > Read`; an access check for `Read` is satisfied
/// by a `Write` grant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    Read,
    Write,
}

/// A non-owner user granted access to a path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sharer {
    pub username: String,
    pub access_type: AccessType,
}

impl Sharer {
    pub fn new(username: impl Into<String>, access_type: AccessType) -> Self {
        Self {
            username: username.into(),
            access_type,
        }
    }
}

/// One entry in a path's content version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentVersion {
    pub hash: VersionHash,
    pub timestamp: DateTime<Utc>,
}

impl ContentVersion {
    pub fn new(hash: VersionHash) -> Self {
        Self {
            hash,
            timestamp: Utc::now(),
        }
    }
}

/// The version-store entry for one synchronized path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Path relative to the synchronized root
    pub path: String,
    /// Owning username; `None` after sharing metadata has been stripped
    pub owner: Option<String>,
    /// Whether the path is shared with at least one other user
    pub is_shared: bool,
    /// The capability this node holds if the path was shared *to* it
    pub access_type: Option<AccessType>,
    /// All users the path is shared with
    pub sharers: Vec<Sharer>,
    /// Content version history, oldest first
    pub versions: Vec<ContentVersion>,
}

impl PathRecord {
    /// Create a fresh record for a path owned by `owner` with no sharing
    pub fn new(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner: Some(owner.into()),
            is_shared: false,
            access_type: None,
            sharers: Vec::new(),
            versions: Vec::new(),
        }
    }

    /// Hash of the most recent content version, if any
    #[must_use]
    pub fn latest_hash(&self) -> Option<&VersionHash> {
        self.versions.last().map(|v| &v.hash)
    }

    /// Append a new content version
    pub fn add_version(&mut self, hash: VersionHash) {
        self.versions.push(ContentVersion::new(hash));
    }

    /// The access a given sharer holds on this path, if any
    #[must_use]
    pub fn sharer_access(&self, username: &str) -> Option<AccessType> {
        self.sharers
            .iter()
            .find(|s| s.username == username)
            .map(|s| s.access_type)
    }

    /// Add or upgrade a sharer entry
    pub fn add_sharer(&mut self, sharer: Sharer) {
        match self.sharers.iter_mut().find(|s| s.username == sharer.username) {
            Some(existing) => existing.access_type = sharer.access_type,
            None => self.sharers.push(sharer),
        }
        self.is_shared = !self.sharers.is_empty();
    }

    /// Strip all sharing metadata, as done when a deletion propagates
    pub fn clear_sharing(&mut self) {
        self.sharers.clear();
        self.is_shared = false;
        self.access_type = None;
        self.owner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> VersionHash {
        VersionHash::new(s).unwrap()
    }

    #[test]
    fn test_access_ordering() {
        assert!(AccessType::Write > AccessType::Read);
        assert!(AccessType::Write >= AccessType::Write);
    }

    #[test]
    fn test_latest_hash_follows_versions() {
        let mut record = PathRecord::new("docs/a.txt", "alice");
        assert!(record.latest_hash().is_none());

        record.add_version(hash("v1"));
        record.add_version(hash("v2"));
        assert_eq!(record.latest_hash().unwrap().as_str(), "v2");
    }

    #[test]
    fn test_sharer_access_lookup() {
        let mut record = PathRecord::new("docs/a.txt", "alice");
        record.add_sharer(Sharer::new("bob", AccessType::Read));

        assert_eq!(record.sharer_access("bob"), Some(AccessType::Read));
        assert_eq!(record.sharer_access("mallory"), None);
        assert!(record.is_shared);
    }

    #[test]
    fn test_add_sharer_upgrades_existing() {
        let mut record = PathRecord::new("docs/a.txt", "alice");
        record.add_sharer(Sharer::new("bob", AccessType::Read));
        record.add_sharer(Sharer::new("bob", AccessType::Write));

        assert_eq!(record.sharers.len(), 1);
        assert_eq!(record.sharer_access("bob"), Some(AccessType::Write));
    }

    #[test]
    fn test_clear_sharing_strips_everything() {
        let mut record = PathRecord::new("docs/a.txt", "alice");
        record.add_sharer(Sharer::new("bob", AccessType::Write));
        record.access_type = Some(AccessType::Write);

        record.clear_sharing();

        assert!(record.sharers.is_empty());
        assert!(!record.is_shared);
        assert!(record.access_type.is_none());
        assert!(record.owner.is_none());
    }
}
