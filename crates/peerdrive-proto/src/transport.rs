//! Transport port (driven/secondary port)
//!
//! The messaging seam between the protocol engine and whatever moves
//! bytes between peers. The transport is assumed to be a reliable
//! point-to-point primitive: discovery, NAT traversal and reconnects are
//! its problem, not ours.
//!
//! Inbound traffic is split by the transport itself: requests go to the
//! node's request dispatcher, responses go to whichever response callback
//! is registered under the message's exchange id. Each delivery arrives
//! on its own task, so callbacks must tolerate concurrent invocation.

use std::sync::Arc;

use async_trait::async_trait;

use peerdrive_core::domain::{ExchangeId, PeerAddress};

use crate::message::Message;

/// Receives the responses of one exchange
#[async_trait]
pub trait IResponseCallback: Send + Sync {
    async fn on_response(&self, response: Message);
}

/// Port trait for the point-to-point messaging layer
#[async_trait]
pub trait ITransport: Send + Sync {
    /// Send one message to one peer
    async fn send_direct(&self, address: &PeerAddress, message: Message) -> anyhow::Result<()>;

    /// Route future responses for `exchange_id` to `callback`
    fn register_response_callback(
        &self,
        exchange_id: ExchangeId,
        callback: Arc<dyn IResponseCallback>,
    );

    /// Drop the response routing for `exchange_id`
    ///
    /// Must be idempotent: unregistering an id that is not registered is
    /// a no-op.
    fn unregister_response_callback(&self, exchange_id: &ExchangeId);
}
