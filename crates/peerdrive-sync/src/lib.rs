//! Peerdrive Sync - the per-event synchronization pipeline
//!
//! Composes the protocol phases from `peerdrive-proto` into the pipeline
//! that runs for every local filesystem change:
//!
//! ```text
//! watcher ──→ FileSyncer ──→ offer ──→ conflict copy
//!                                  ├──→ reschedule
//!                                  └──→ push / delete / move
//! ```
//!
//! Also home to the conflict-copy writer and the `tokio::fs`-backed
//! storage adapter for the synchronized folder.

pub mod conflict;
pub mod filesystem;
pub mod syncer;
