//! Port definitions (driven/secondary ports)
//!
//! Traits for the external collaborators the sync core depends on:
//! storage I/O, the version store, the durable file-id map, and the
//! user's device directory. Adapters live in the host application or in
//! `peerdrive-sync` (disk storage).

pub mod identifier_map;
pub mod locations;
pub mod storage;
pub mod version_store;

pub use identifier_map::IIdentifierMap;
pub use locations::ILocations;
pub use storage::{IStorage, StorageKind};
pub use version_store::IVersionStore;
