//! Shared fixtures: in-process nodes wired over a loopback hub
#![allow(dead_code)]

use std::sync::Arc;

use peerdrive_core::config::SyncConfig;
use peerdrive_core::domain::{ClientDevice, DeviceId, PeerAddress};
use peerdrive_core::ignore::IgnoreRegistry;
use peerdrive_proto::context::NodeContext;
use peerdrive_proto::dispatch::RequestDispatcher;
use peerdrive_proto::exchange::ExchangeCoordinator;
use peerdrive_proto::testing::{
    LoopbackHub, MemoryIdentifierMap, MemoryStorage, MemoryVersionStore,
};

pub struct TestNode {
    pub device: ClientDevice,
    pub ctx: Arc<NodeContext>,
    pub coordinator: Arc<ExchangeCoordinator>,
    pub storage: Arc<MemoryStorage>,
    pub version_store: Arc<MemoryVersionStore>,
    pub identifier_map: Arc<MemoryIdentifierMap>,
    pub ignore: Arc<IgnoreRegistry>,
}

/// A chunk size small enough to force multi-chunk transfers in tests
pub fn small_chunks() -> SyncConfig {
    SyncConfig {
        chunk_size: 4,
        ..SyncConfig::default()
    }
}

/// Stand up one node on the hub with all protocol handlers attached
pub fn spawn_node(
    hub: &Arc<LoopbackHub>,
    username: &str,
    host: &str,
    config: SyncConfig,
) -> TestNode {
    let device = ClientDevice::new(username, DeviceId::new(), PeerAddress::new(host, 4000));
    let transport = hub.transport(&device.address);

    let storage = Arc::new(MemoryStorage::new());
    let version_store = Arc::new(MemoryVersionStore::new());
    let identifier_map = Arc::new(MemoryIdentifierMap::new());
    let ignore = Arc::new(IgnoreRegistry::new());

    let ctx = NodeContext::new(
        device.clone(),
        storage.clone(),
        version_store.clone(),
        identifier_map.clone(),
        ignore.clone(),
        transport.clone(),
        config,
    );

    let dispatcher = Arc::new(RequestDispatcher::standard(ctx.clone()));
    hub.attach_dispatcher(&device.address, dispatcher);

    let coordinator = Arc::new(ExchangeCoordinator::new(transport));

    TestNode {
        device,
        ctx,
        coordinator,
        storage,
        version_store,
        identifier_map,
        ignore,
    }
}
