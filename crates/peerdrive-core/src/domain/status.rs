//! Protocol status codes
//!
//! Every protocol phase reports its outcome as one of these codes. They
//! travel in the common message header, so denial and conflict are normal
//! protocol results rather than transport faults.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Outcome of a protocol phase or of one request within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The receiver accepted the request and expects the follow-up phase
    Accepted,
    /// The receiver refused the request; the initiator may retry later
    Denied,
    /// The receiver detected a concurrent divergent edit of the same path
    Conflict,
    /// The requesting user lacks the capability for this operation
    AccessDenied,
    /// An unexpected failure occurred while handling the request
    Error,
    /// The content being transferred changed mid-exchange; restart from zero
    FileChanged,
}

impl StatusCode {
    /// Whether this code terminates a transfer target (no further chunks)
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            StatusCode::Denied | StatusCode::AccessDenied | StatusCode::Error
        )
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Accepted => "ACCEPTED",
            StatusCode::Denied => "DENIED",
            StatusCode::Conflict => "CONFLICT",
            StatusCode::AccessDenied => "ACCESS_DENIED",
            StatusCode::Error => "ERROR",
            StatusCode::FileChanged => "FILE_CHANGED",
        };
        write!(f, "{s}")
    }
}
