//! Peerdrive Core - Domain model and ports for the sync protocol
//!
//! This crate contains the shared foundation of the Peerdrive sync core:
//! - **Domain entities** - `ChangeEvent`, `PathRecord`, `StatusCode`, `ClientDevice`
//! - **Port definitions** - Traits for external collaborators: `IStorage`,
//!   `IVersionStore`, `IIdentifierMap`, `ILocations`
//! - **Ignore registry** - Echo suppression for self-caused filesystem events
//! - **Access gate** - Capability checks against a path's sharing record
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data types with no I/O. Ports define
//! trait interfaces that adapter crates (or the host application) implement.
//! Protocol logic lives in `peerdrive-proto`; the per-event pipeline lives
//! in `peerdrive-sync`.

pub mod access;
pub mod config;
pub mod domain;
pub mod ignore;
pub mod ports;
