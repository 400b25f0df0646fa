//! In-memory adapters and a loopback transport
//!
//! Everything needed to wire several in-process nodes into a real
//! protocol conversation without disk or network: memory-backed
//! implementations of the storage, version-store and identifier-map
//! ports, a static device directory, and a [`LoopbackHub`] that routes
//! messages between the nodes registered on it.
//!
//! Lives in the crate proper (not `#[cfg(test)]`) so downstream crates
//! can drive their own protocol tests against it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use peerdrive_core::domain::{ClientDevice, ExchangeId, FileId, PathRecord, PeerAddress};
use peerdrive_core::ports::{
    IIdentifierMap, ILocations, IStorage, IVersionStore, StorageKind,
};

use crate::dispatch::RequestDispatcher;
use crate::message::Message;
use crate::transport::{IResponseCallback, ITransport};

// ---------------------------------------------------------------------------
// Memory storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// Memory-backed synchronized folder
#[derive(Default)]
pub struct MemoryStorage {
    nodes: Mutex<HashMap<String, Node>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a file, for assertions
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn ensure_parents(nodes: &mut HashMap<String, Node>, path: &str) {
        let mut ancestor = std::path::Path::new(path).parent();
        while let Some(dir) = ancestor {
            let dir_str = dir.to_string_lossy();
            if dir_str.is_empty() {
                break;
            }
            nodes.entry(dir_str.into_owned()).or_insert(Node::Dir);
            ancestor = dir.parent();
        }
    }
}

#[async_trait]
impl IStorage for MemoryStorage {
    async fn exists(&self, kind: StorageKind, path: &str) -> anyhow::Result<bool> {
        Ok(matches!(
            (kind, self.nodes.lock().unwrap().get(path)),
            (StorageKind::File, Some(Node::File(_))) | (StorageKind::Directory, Some(Node::Dir))
        ))
    }

    async fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        Ok(matches!(self.nodes.lock().unwrap().get(path), Some(Node::Dir)))
    }

    async fn size(&self, path: &str) -> anyhow::Result<u64> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => Ok(data.len() as u64),
            Some(Node::Dir) => Ok(0),
            None => anyhow::bail!("no such path: {path}"),
        }
    }

    async fn read(&self, path: &str, offset: u64, len: u64) -> anyhow::Result<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => {
                let start = (offset as usize).min(data.len());
                let end = (start + len as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Node::Dir) => anyhow::bail!("cannot read a directory: {path}"),
            None => anyhow::bail!("no such file: {path}"),
        }
    }

    async fn persist(
        &self,
        kind: StorageKind,
        path: &str,
        offset: u64,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        Self::ensure_parents(&mut nodes, path);

        match kind {
            StorageKind::Directory => {
                nodes.entry(path.to_string()).or_insert(Node::Dir);
            }
            StorageKind::File => {
                let entry = nodes
                    .entry(path.to_string())
                    .or_insert_with(|| Node::File(Vec::new()));
                let Node::File(data) = entry else {
                    anyhow::bail!("path is a directory: {path}");
                };

                if bytes.is_empty() {
                    if offset == 0 {
                        data.clear();
                    }
                } else {
                    let offset = offset as usize;
                    if data.len() < offset {
                        data.resize(offset, 0);
                    }
                    let end = offset + bytes.len();
                    if data.len() < end {
                        data.resize(end, 0);
                    }
                    data[offset..end].copy_from_slice(bytes);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let prefix = format!("{path}/");
        nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> anyhow::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(old_path) {
            anyhow::bail!("no such path: {old_path}");
        }

        let prefix = format!("{old_path}/");
        let moved: Vec<(String, Node)> = nodes
            .iter()
            .filter(|(key, _)| *key == old_path || key.starts_with(&prefix))
            .map(|(key, node)| {
                let suffix = &key[old_path.len()..];
                (format!("{new_path}{suffix}"), node.clone())
            })
            .collect();

        nodes.retain(|key, _| key != old_path && !key.starts_with(&prefix));
        Self::ensure_parents(&mut nodes, new_path);
        nodes.extend(moved);
        Ok(())
    }

    async fn checksum(&self, path: &str) -> anyhow::Result<String> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                Ok(format!("{:x}", hasher.finalize()))
            }
            Some(Node::Dir) => anyhow::bail!("directories have no checksum: {path}"),
            None => anyhow::bail!("no such file: {path}"),
        }
    }

    async fn list_contents(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let prefix = format!("{path}/");
        let mut contents: Vec<String> = self
            .nodes
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        contents.sort();
        Ok(contents)
    }
}

// ---------------------------------------------------------------------------
// Memory version store / identifier map / locations
// ---------------------------------------------------------------------------

/// Memory-backed version store
#[derive(Default)]
pub struct MemoryVersionStore {
    records: Mutex<HashMap<String, PathRecord>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, for test setup
    pub fn put(&self, record: PathRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.path.clone(), record);
    }
}

#[async_trait]
impl IVersionStore for MemoryVersionStore {
    async fn get_record(&self, path: &str) -> anyhow::Result<Option<PathRecord>> {
        Ok(self.records.lock().unwrap().get(path).cloned())
    }

    async fn write_record(&self, record: &PathRecord) -> anyhow::Result<()> {
        self.put(record.clone());
        Ok(())
    }
}

/// Memory-backed identifier map
#[derive(Default)]
pub struct MemoryIdentifierMap {
    inner: Mutex<IdentifierMaps>,
}

#[derive(Default)]
struct IdentifierMaps {
    by_id: HashMap<FileId, String>,
    by_path: HashMap<String, FileId>,
}

impl MemoryIdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IIdentifierMap for MemoryIdentifierMap {
    async fn resolve(&self, file_id: &FileId) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().unwrap().by_id.get(file_id).cloned())
    }

    async fn lookup(&self, path: &str) -> anyhow::Result<Option<FileId>> {
        Ok(self.inner.lock().unwrap().by_path.get(path).copied())
    }

    async fn register(&self, path: &str, file_id: FileId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old_path) = inner.by_id.insert(file_id, path.to_string()) {
            inner.by_path.remove(&old_path);
        }
        inner.by_path.insert(path.to_string(), file_id);
        Ok(())
    }
}

/// A fixed device directory
pub struct StaticLocations {
    devices: Vec<ClientDevice>,
}

impl StaticLocations {
    pub fn new(devices: Vec<ClientDevice>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl ILocations for StaticLocations {
    async fn locations(&self) -> anyhow::Result<Vec<ClientDevice>> {
        Ok(self.devices.clone())
    }
}

// ---------------------------------------------------------------------------
// Loopback transport
// ---------------------------------------------------------------------------

struct NodeWiring {
    dispatcher: Mutex<Option<Arc<RequestDispatcher>>>,
    callbacks: Arc<DashMap<ExchangeId, Arc<dyn IResponseCallback>>>,
}

/// Routes messages between in-process nodes
///
/// Requests land on the receiving node's dispatcher, responses on the
/// callback registered under their exchange id; each delivery runs on its
/// own task, mirroring how a real transport hands messages up.
#[derive(Default)]
pub struct LoopbackHub {
    nodes: DashMap<PeerAddress, NodeWiring>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the transport endpoint for a node at `address`
    pub fn transport(self: &Arc<Self>, address: &PeerAddress) -> Arc<LoopbackTransport> {
        let callbacks: Arc<DashMap<ExchangeId, Arc<dyn IResponseCallback>>> =
            Arc::new(DashMap::new());
        self.nodes.insert(
            address.clone(),
            NodeWiring {
                dispatcher: Mutex::new(None),
                callbacks: callbacks.clone(),
            },
        );
        Arc::new(LoopbackTransport {
            hub: self.clone(),
            callbacks,
        })
    }

    /// Wire a node's request dispatcher in once its context exists
    pub fn attach_dispatcher(&self, address: &PeerAddress, dispatcher: Arc<RequestDispatcher>) {
        if let Some(node) = self.nodes.get(address) {
            *node.dispatcher.lock().unwrap() = Some(dispatcher);
        }
    }
}

/// One node's endpoint on a [`LoopbackHub`]
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    callbacks: Arc<DashMap<ExchangeId, Arc<dyn IResponseCallback>>>,
}

#[async_trait]
impl ITransport for LoopbackTransport {
    async fn send_direct(&self, address: &PeerAddress, message: Message) -> anyhow::Result<()> {
        let Some(node) = self.hub.nodes.get(address) else {
            anyhow::bail!("unknown peer: {address}");
        };

        if message.kind().is_request() {
            let dispatcher = node.dispatcher.lock().unwrap().clone();
            let Some(dispatcher) = dispatcher else {
                anyhow::bail!("peer {address} has no dispatcher attached");
            };
            tokio::spawn(async move {
                dispatcher.dispatch(message).await;
            });
        } else {
            let callback = node
                .callbacks
                .get(&message.header().exchange_id)
                .map(|entry| Arc::clone(entry.value()));
            match callback {
                Some(callback) => {
                    tokio::spawn(async move {
                        callback.on_response(message).await;
                    });
                }
                None => {
                    debug!(
                        exchange_id = %message.header().exchange_id,
                        kind = %message.kind(),
                        "no callback for response, dropping"
                    );
                }
            }
        }
        Ok(())
    }

    fn register_response_callback(
        &self,
        exchange_id: ExchangeId,
        callback: Arc<dyn IResponseCallback>,
    ) {
        self.callbacks.insert(exchange_id, callback);
    }

    fn unregister_response_callback(&self, exchange_id: &ExchangeId) {
        self.callbacks.remove(exchange_id);
    }
}
