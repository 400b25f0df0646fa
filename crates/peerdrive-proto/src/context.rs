//! Shared node context for protocol handlers
//!
//! Every exchange and request handler works against the same small set of
//! collaborators: this node's identity, the storage and version-store
//! ports, the identifier map, the ignore registry, the access gate and
//! the transport. [`NodeContext`] bundles them once so handler
//! construction stays flat.

use std::sync::Arc;

use peerdrive_core::access::AccessGate;
use peerdrive_core::config::SyncConfig;
use peerdrive_core::domain::{ClientDevice, StatusCode};
use peerdrive_core::ignore::IgnoreRegistry;
use peerdrive_core::ports::{IIdentifierMap, IStorage, IVersionStore};

use crate::message::{Message, MessageHeader};
use crate::transport::ITransport;

/// Everything a protocol handler needs about the local node
pub struct NodeContext {
    /// This device's identity (username, device id, own address)
    pub device: ClientDevice,
    /// The synchronized folder
    pub storage: Arc<dyn IStorage>,
    /// Path ownership/sharing records
    pub version_store: Arc<dyn IVersionStore>,
    /// Durable file-id to local-path mapping
    pub identifier_map: Arc<dyn IIdentifierMap>,
    /// Echo suppression markers
    pub ignore: Arc<IgnoreRegistry>,
    /// Capability checks
    pub access: AccessGate,
    /// Outbound messaging
    pub transport: Arc<dyn ITransport>,
    /// Chunking and shared-folder settings
    pub sync_config: SyncConfig,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ClientDevice,
        storage: Arc<dyn IStorage>,
        version_store: Arc<dyn IVersionStore>,
        identifier_map: Arc<dyn IIdentifierMap>,
        ignore: Arc<IgnoreRegistry>,
        transport: Arc<dyn ITransport>,
        sync_config: SyncConfig,
    ) -> Arc<Self> {
        let access = AccessGate::new(version_store.clone());
        Arc::new(Self {
            device,
            storage,
            version_store,
            identifier_map,
            ignore,
            access,
            transport,
            sync_config,
        })
    }

    /// The username this node acts as
    pub fn username(&self) -> &str {
        &self.device.username
    }

    /// Header for a response to `request`, addressed back at its sender
    pub fn response_header(&self, request: &MessageHeader, status: StatusCode) -> MessageHeader {
        MessageHeader::new(
            request.exchange_id,
            status,
            self.device.clone(),
            request.sender.address.clone(),
        )
    }

    /// Send a response to the address in its own header
    pub async fn reply(&self, response: Message) -> anyhow::Result<()> {
        let receiver = response.header().receiver.clone();
        self.transport.send_direct(&receiver, response).await
    }
}
