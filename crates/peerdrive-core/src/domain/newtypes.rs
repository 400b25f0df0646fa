//! Identifier newtypes with validation
//!
//! Strongly-typed wrappers for the ids that cross the wire. Each newtype
//! ensures a value is well-formed at construction time and keeps the
//! different id spaces from being mixed up in signatures.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Identifier of one protocol exchange (one multi-peer request/response round)
///
/// An exchange id is minted once when a pipeline phase starts and is never
/// reused; every request and response of that phase carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Create a new random ExchangeId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an ExchangeId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExchangeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid exchange id: {e}")))
    }
}

/// Identifier of one device of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Create a new random DeviceId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a DeviceId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short hex prefix used to qualify conflict-copy names
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable identifier of a replicated file, stable across renames
///
/// Owners and sharers may keep the same file under different local paths;
/// the file id is the key that ties those paths together through the
/// identifier map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Create a new random FileId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a FileId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of one content version of a path
///
/// Opaque to the protocol: versions are only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionHash(String);

impl VersionHash {
    /// Create a VersionHash, rejecting empty values
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("hash must not be empty".into()));
        }
        Ok(Self(hash))
    }

    /// The hash as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VersionHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_uniqueness() {
        assert_ne!(ExchangeId::new(), ExchangeId::new());
    }

    #[test]
    fn test_exchange_id_roundtrip() {
        let id = ExchangeId::new();
        let parsed: ExchangeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_exchange_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<ExchangeId>().is_err());
    }

    #[test]
    fn test_device_id_short_is_eight_chars() {
        assert_eq!(DeviceId::new().short().len(), 8);
    }

    #[test]
    fn test_version_hash_rejects_empty() {
        assert!(VersionHash::new("").is_err());
        assert!(VersionHash::new("abc123").is_ok());
    }

    #[test]
    fn test_version_hash_equality() {
        let a = VersionHash::new("deadbeef").unwrap();
        let b = VersionHash::new("deadbeef").unwrap();
        assert_eq!(a, b);
    }
}
