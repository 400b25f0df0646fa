//! Peerdrive Proto - the exchange protocol engine
//!
//! Implements the multi-peer request/response protocol family the sync
//! pipeline is built from:
//!
//! - [`message`] - the closed union of wire messages
//! - [`transport`] - the point-to-point messaging seam
//! - [`exchange`] - the generic broadcast-and-collect coordinator
//! - [`dispatch`] - message-kind to request-handler routing
//! - [`offer`] - negotiation: may this change propagate?
//! - [`push`] / [`demand`] - chunked content transfer (send / pull)
//! - [`delete`] / [`relocate`] - structural propagation
//!
//! Each protocol phase comes in two halves: an initiator-side *exchange*
//! that drives requests toward a set of peers, and a receiver-side
//! *request handler* wired into the [`dispatch::RequestDispatcher`].
//!
//! The [`testing`] module ships in-memory adapters and a loopback
//! transport for wiring multiple in-process nodes together in tests.

pub mod context;
pub mod delete;
pub mod demand;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod message;
pub mod offer;
pub mod push;
pub mod relocate;
pub mod share;
pub mod testing;
pub mod transport;
