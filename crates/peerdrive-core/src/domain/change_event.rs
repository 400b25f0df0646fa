//! Local filesystem change events
//!
//! A [`ChangeEvent`] is produced by the (external) filesystem watcher and
//! consumed exactly once by the sync orchestrator. Paths are relative to
//! the synchronized root; the optional hash is the content version the
//! watcher recorded for the path before this change, used as the baseline
//! for conflict detection during offer negotiation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::VersionHash;

/// The kind of filesystem change, also used as the ignore-marker key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
    Move,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Modify => "modify",
            EventKind::Delete => "delete",
            EventKind::Move => "move",
        };
        write!(f, "{s}")
    }
}

/// A single detected local change, the unit of work of the sync pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened
    pub kind: EventKind,
    /// The affected path, relative to the synchronized root
    pub path: String,
    /// The destination path for moves, absent otherwise
    pub new_path: Option<String>,
    /// Content version hash of the path before this change, if known
    pub hash: Option<VersionHash>,
    /// When the watcher observed the change
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn created(path: impl Into<String>, hash: Option<VersionHash>) -> Self {
        Self {
            kind: EventKind::Create,
            path: path.into(),
            new_path: None,
            hash,
            timestamp: Utc::now(),
        }
    }

    pub fn modified(path: impl Into<String>, hash: Option<VersionHash>) -> Self {
        Self {
            kind: EventKind::Modify,
            path: path.into(),
            new_path: None,
            hash,
            timestamp: Utc::now(),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            path: path.into(),
            new_path: None,
            hash: None,
            timestamp: Utc::now(),
        }
    }

    pub fn moved(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Move,
            path: old.into(),
            new_path: Some(new.into()),
            hash: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_event() {
        let event = ChangeEvent::created("docs/a.txt", None);
        assert_eq!(event.kind, EventKind::Create);
        assert_eq!(event.path, "docs/a.txt");
        assert!(event.new_path.is_none());
    }

    #[test]
    fn test_moved_event_carries_both_paths() {
        let event = ChangeEvent::moved("old/a.txt", "new/a.txt");
        assert_eq!(event.kind, EventKind::Move);
        assert_eq!(event.path, "old/a.txt");
        assert_eq!(event.new_path.as_deref(), Some("new/a.txt"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EventKind::Delete.to_string(), "delete");
    }
}
