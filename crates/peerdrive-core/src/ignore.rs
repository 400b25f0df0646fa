//! Echo suppression registry
//!
//! Every local write the sync core performs on behalf of a remote peer is
//! about to be observed by the local filesystem watcher as if it were a
//! fresh user edit. To keep that echo out of the pipeline, the writing
//! handler registers a marker *before* touching storage, and the
//! orchestrator consume-tests every observed [`ChangeEvent`] against the
//! registry before starting a sync round.
//!
//! ```text
//! remote request ──→ handler ──→ register(kind, path) ──→ write to storage
//!                                                              │
//!                                       watcher event ◄────────┘
//!                                            │
//! orchestrator ──→ try_consume(kind, path) ──┴──→ match: suppressed
//! ```
//!
//! Matching is "weak": kind plus path string, nothing else. Each marker is
//! consumed at most once, so two genuine events after one registration
//! suppress exactly one of them. Markers have no expiry; one whose event
//! never fires lingers until a later matching event eats it. After a
//! checksum-verified transfer the receiver calls [`IgnoreRegistry::drain_modify`]
//! to clear leftover modify markers, which bounds the common case.

use std::sync::Mutex;

use tracing::debug;

use crate::domain::EventKind;

/// A pending self-caused-event marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreEntry {
    pub kind: EventKind,
    pub path: String,
}

/// Process-wide registry of pending self-caused-event markers
///
/// Thread-safe under concurrent registration from protocol handlers and
/// consumption from the watcher-delivery side.
#[derive(Debug, Default)]
pub struct IgnoreRegistry {
    entries: Mutex<Vec<IgnoreEntry>>,
}

impl IgnoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a marker for a write this node is about to perform
    pub fn register(&self, kind: EventKind, path: impl Into<String>) {
        let entry = IgnoreEntry {
            kind,
            path: path.into(),
        };
        debug!(kind = %entry.kind, path = %entry.path, "registering ignore marker");
        self.entries
            .lock()
            .expect("ignore registry lock poisoned")
            .push(entry);
    }

    /// Consume-test an observed event against the registry
    ///
    /// Removes and returns `true` on the first (kind, path) match, `false`
    /// otherwise. At most one marker is consumed per call.
    pub fn try_consume(&self, kind: EventKind, path: &str) -> bool {
        let mut entries = self.entries.lock().expect("ignore registry lock poisoned");
        if let Some(pos) = entries
            .iter()
            .position(|e| e.kind == kind && e.path == path)
        {
            entries.remove(pos);
            debug!(kind = %kind, path = %path, "consumed ignore marker");
            return true;
        }
        false
    }

    /// Remove every pending Modify marker for a path
    ///
    /// Called after a checksum-verified transfer so stale modify markers
    /// cannot suppress a later genuine edit of the same file.
    pub fn drain_modify(&self, path: &str) {
        let mut entries = self.entries.lock().expect("ignore registry lock poisoned");
        let before = entries.len();
        entries.retain(|e| !(e.kind == EventKind::Modify && e.path == path));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(path = %path, removed, "drained modify markers");
        }
    }

    /// Number of pending markers
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("ignore registry lock poisoned")
            .len()
    }

    /// Whether no markers are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
