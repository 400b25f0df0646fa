//! Push transfer phase
//!
//! The initiator owns the content and pushes it chunk by chunk to every
//! peer that accepted the offer. The protocol is response-driven: the
//! initiator sends chunk 0 to everyone, and from then on each reply tells
//! it which chunk that one peer wants next. A peer requesting `-1` is
//! finished (or gave up); a peer requesting `0` again wants a restart
//! after a checksum mismatch. The phase completes when every addressed
//! peer has terminated, one way or the other.
//!
//! Ownership and sharing metadata ride only on chunk 0; the checksum and
//! total chunk count ride only on the final chunk. Receivers that cannot
//! place the file under a known path synthesize one below their shared
//! folder root and register the durable file id for it first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use peerdrive_core::domain::{
    AccessType, ClientDevice, EventKind, ExchangeId, FileId, PeerAddress, Sharer, StatusCode,
};
use peerdrive_core::ports::{IIdentifierMap, IStorage, IVersionStore, StorageKind};

use crate::context::NodeContext;
use crate::dispatch::IRequestHandler;
use crate::error::ProtoError;
use crate::message::{Message, MessageHeader, MessageKind, PushRequest, PushResponse};
use crate::share;
use crate::transport::{IResponseCallback, ITransport};

/// Metadata attached to chunk 0, computed once per push
struct PushMetadata {
    is_file: bool,
    owner: Option<String>,
    access_type: Option<AccessType>,
    sharers: Vec<Sharer>,
    file_id: Option<FileId>,
}

/// Per-target transfer progress
struct TargetState {
    last_sent: i64,
    done: bool,
}

/// Initiator side of the push phase
///
/// Registered as its own response callback: every [`PushResponse`] drives
/// exactly one target forward, and the delivery that retires the last
/// active target fires the private completion signal.
pub struct PushExchange {
    ctx: Arc<NodeContext>,
    exchange_id: ExchangeId,
    path: String,
    audience: Vec<ClientDevice>,
    metadata: OnceLock<PushMetadata>,
    targets: DashMap<PeerAddress, TargetState>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
    completed: AtomicBool,
    deregistered: AtomicBool,
}

impl PushExchange {
    pub fn new(
        ctx: Arc<NodeContext>,
        exchange_id: ExchangeId,
        path: impl Into<String>,
        audience: Vec<ClientDevice>,
    ) -> Arc<Self> {
        let (done_tx, done_rx) = oneshot::channel();
        Arc::new(Self {
            ctx,
            exchange_id,
            path: path.into(),
            audience,
            metadata: OnceLock::new(),
            targets: DashMap::new(),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
            completed: AtomicBool::new(false),
            deregistered: AtomicBool::new(false),
        })
    }

    /// Push the file to every audience member, waiting up to `timeout`
    ///
    /// Returns whether every target terminated before the deadline.
    pub async fn run(self: &Arc<Self>, timeout: Duration) -> anyhow::Result<bool> {
        if self.audience.is_empty() {
            debug!("push with empty audience, nothing to do");
            self.completed.store(true, Ordering::Release);
            return Ok(true);
        }

        let metadata = self.load_metadata().await?;
        let _ = self.metadata.set(metadata);

        self.ctx
            .transport
            .register_response_callback(self.exchange_id, self.clone() as Arc<dyn IResponseCallback>);

        for device in &self.audience {
            self.targets.insert(
                device.address.clone(),
                TargetState {
                    last_sent: -1,
                    done: false,
                },
            );
        }

        info!(
            exchange_id = %self.exchange_id,
            path = %self.path,
            targets = self.audience.len(),
            "starting push"
        );
        for device in &self.audience {
            if let Err(err) = self.send_chunk(device, 0, StatusCode::Accepted).await {
                warn!(peer = %device, error = %err, "failed to send first chunk");
            }
        }

        let done_rx = self.done_rx.lock().expect("push lock poisoned").take();
        if let Some(done_rx) = done_rx {
            let _ = tokio::time::timeout(timeout, done_rx).await;
        }

        self.deregister();
        Ok(self.completed.load(Ordering::Acquire))
    }

    async fn load_metadata(&self) -> anyhow::Result<PushMetadata> {
        let is_file = !self.ctx.storage.is_dir(&self.path).await.unwrap_or(false);
        let record = self.ctx.version_store.get_record(&self.path).await?;

        let (owner, access_type, sharers) = match record {
            Some(record) => (
                record.owner.clone().or_else(|| Some(self.ctx.username().to_string())),
                record.access_type,
                record.sharers,
            ),
            None => (Some(self.ctx.username().to_string()), None, Vec::new()),
        };

        // make sure every receiver can tie this path to a durable id
        let file_id = match self.ctx.identifier_map.lookup(&self.path).await? {
            Some(id) => Some(id),
            None => {
                let id = FileId::new();
                self.ctx.identifier_map.register(&self.path, id).await?;
                Some(id)
            }
        };

        Ok(PushMetadata {
            is_file,
            owner,
            access_type,
            sharers,
            file_id,
        })
    }

    /// Send one chunk to one target
    ///
    /// If the source shrank below the requested index, the transfer for
    /// that target restarts at chunk 0 with a FILE_CHANGED status.
    async fn send_chunk(
        &self,
        target: &ClientDevice,
        index: u64,
        status: StatusCode,
    ) -> anyhow::Result<()> {
        let Some(metadata) = self.metadata.get() else {
            anyhow::bail!("push metadata not loaded");
        };
        let chunk_size = self.ctx.sync_config.chunk_size;

        let mut index = index;
        let mut status = status;
        let (total, data, checksum) = if metadata.is_file {
            let size = self.ctx.storage.size(&self.path).await?;
            let total = size.div_ceil(chunk_size).max(1);
            if index >= total {
                debug!(index, total, "source shrank, restarting target from chunk 0");
                index = 0;
                status = StatusCode::FileChanged;
            }
            let data = self
                .ctx
                .storage
                .read(&self.path, index * chunk_size, chunk_size)
                .await?;
            let checksum = if index + 1 == total {
                Some(self.ctx.storage.checksum(&self.path).await?)
            } else {
                None
            };
            (total, data, checksum)
        } else {
            (1, Vec::new(), None)
        };

        let first = index == 0;
        let last = index + 1 == total;

        debug!(peer = %target, index, total, last, "sending chunk");

        let request = Message::PushRequest(PushRequest {
            header: MessageHeader::new(
                self.exchange_id,
                status,
                self.ctx.device.clone(),
                target.address.clone(),
            ),
            path: self.path.clone(),
            is_file: metadata.is_file,
            chunk_index: index,
            chunk_size,
            total_chunks: last.then_some(total),
            checksum,
            owner: if first { metadata.owner.clone() } else { None },
            access_type: if first { metadata.access_type } else { None },
            sharers: if first {
                metadata.sharers.clone()
            } else {
                Vec::new()
            },
            file_id: metadata.file_id,
            data,
        });

        if let Some(mut state) = self.targets.get_mut(&target.address) {
            state.last_sent = index as i64;
        }

        self.ctx.transport.send_direct(&target.address, request).await
    }

    fn retire_target(&self, address: &PeerAddress) {
        if let Some(mut state) = self.targets.get_mut(address) {
            state.done = true;
        }

        let all_done = self.targets.iter().all(|entry| entry.done);
        if all_done && !self.completed.swap(true, Ordering::AcqRel) {
            if let Some(done_tx) = self.done_tx.lock().expect("push lock poisoned").take() {
                let _ = done_tx.send(());
            }
        }
    }

    fn deregister(&self) {
        if !self.deregistered.swap(true, Ordering::AcqRel) {
            self.ctx
                .transport
                .unregister_response_callback(&self.exchange_id);
        }
    }
}

#[async_trait]
impl IResponseCallback for PushExchange {
    async fn on_response(&self, response: Message) {
        let Message::PushResponse(response) = response else {
            let err = ProtoError::UnexpectedMessage {
                exchange_id: self.exchange_id,
                expected: MessageKind::PushResponse,
                got: response.kind(),
            };
            warn!(error = %err, "discarding response");
            return;
        };

        let sender = response.header.sender.clone();
        match self.targets.get(&sender.address) {
            None => {
                warn!(sender = %sender, "push response from unaddressed peer, discarding");
                return;
            }
            Some(state) if state.done => return,
            Some(_) => {}
        }

        if response.requesting_chunk < 0 || response.header.status.is_terminal_failure() {
            debug!(
                peer = %sender,
                status = %response.header.status,
                "target terminated"
            );
            self.retire_target(&sender.address);
            return;
        }

        // a reply asking for chunk 0 again is always a restart: the first
        // processed chunk advances the receiver to 1 or ends the transfer
        let index = response.requesting_chunk as u64;
        let status = if index == 0 {
            StatusCode::FileChanged
        } else {
            StatusCode::Accepted
        };

        if let Err(err) = self.send_chunk(&sender, index, status).await {
            error!(peer = %sender, index, error = %err, "failed to send requested chunk");
        }
    }
}

impl Drop for PushExchange {
    fn drop(&mut self) {
        self.deregister();
    }
}

// ===========================================================================
// Receiver side
// ===========================================================================

/// Where an inbound pushed file may be written, per the receiver's records
enum Destination {
    /// A path this node already tracks, or the literal offered path
    Known(String),
    /// A freshly synthesized path inside a shared folder
    SharedChild { path: String, access: AccessType },
    /// The actor may not write here
    Refused,
}

/// Receiver side of the push phase
pub struct PushRequestHandler {
    ctx: Arc<NodeContext>,
}

impl PushRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Resolve where the pushed content belongs on this node
    ///
    /// Owners and tracked sharers resolve through the identifier map. A
    /// file id nobody here has seen, offered by a sharer relationship,
    /// means a new file inside a folder shared with us: a fresh unique
    /// path is synthesized under the matching shared-folder root and the
    /// id registered before anything is written.
    async fn resolve_destination(&self, request: &PushRequest) -> anyhow::Result<Destination> {
        if let Some(file_id) = request.file_id {
            if let Some(path) = self.ctx.identifier_map.resolve(&file_id).await? {
                return Ok(Destination::Known(path));
            }

            if request.owner.as_deref() == Some(self.ctx.username()) {
                // our own user's new file; track it under the offered path
                self.ctx.identifier_map.register(&request.path, file_id).await?;
                return Ok(Destination::Known(request.path.clone()));
            }

            let Some(access) = request
                .sharers
                .iter()
                .find(|s| s.username == self.ctx.username())
                .map(|s| s.access_type)
            else {
                warn!(
                    exchange_id = %request.header.exchange_id,
                    path = %request.path,
                    "no sharer entry for us, cannot place pushed file"
                );
                return Ok(Destination::Refused);
            };

            let owner = request
                .owner
                .clone()
                .unwrap_or_else(|| request.header.sender.username.clone());

            let relative = share::relative_in_shared_folder(
                &self.ctx.version_store,
                &request.path,
                &owner,
            )
            .await?;

            let root = match access {
                AccessType::Write => &self.ctx.sync_config.shared_rw_dir,
                AccessType::Read => &self.ctx.sync_config.shared_ro_dir,
            };
            let candidate =
                share::destination_under_root(&self.ctx.storage, root, &relative).await?;
            let path = share::unique_path(&self.ctx.storage, &candidate).await?;

            self.ctx.identifier_map.register(&path, file_id).await?;
            info!(path = %path, "synthesized destination for shared file");
            return Ok(Destination::SharedChild { path, access });
        }

        // literal path; foreign actors must hold write access
        let requester = &request.header.sender.username;
        if requester != self.ctx.username()
            && !self
                .ctx
                .access
                .has_access(requester, AccessType::Write, &request.path)
                .await?
        {
            warn!(
                exchange_id = %request.header.exchange_id,
                chunk = request.chunk_index,
                path = %request.path,
                requester = %requester,
                "refusing chunk, missing write access"
            );
            return Ok(Destination::Refused);
        }

        Ok(Destination::Known(request.path.clone()))
    }

    /// Publish ownership and sharing metadata to the local record
    async fn publish_metadata(
        &self,
        request: &PushRequest,
        path: &str,
        shared_access: Option<AccessType>,
    ) -> anyhow::Result<()> {
        let mut record = self
            .ctx
            .version_store
            .get_record(path)
            .await?
            .unwrap_or_else(|| peerdrive_core::domain::PathRecord {
                path: path.to_string(),
                owner: None,
                is_shared: false,
                access_type: None,
                sharers: Vec::new(),
                versions: Vec::new(),
            });

        match shared_access {
            // child of a folder shared with us: ownership derives from the
            // pushing user and our own granted capability
            Some(access) => {
                record.owner = Some(request.header.sender.username.clone());
                record.access_type = Some(access);
            }
            None => {
                if request.owner.is_some() {
                    record.owner = request.owner.clone();
                }
                if request.access_type.is_some() {
                    record.access_type = request.access_type;
                }
            }
        }

        for sharer in &request.sharers {
            record.add_sharer(sharer.clone());
        }
        record.is_shared = !record.sharers.is_empty();

        self.ctx.version_store.write_record(&record).await
    }

    /// Write one chunk, ignore-marking every touch beforehand
    async fn write_chunk(&self, request: &PushRequest, path: &str) {
        let storage = &self.ctx.storage;

        if request.is_file {
            let exists = storage
                .exists(StorageKind::File, path)
                .await
                .unwrap_or(false);
            if exists {
                self.ctx.ignore.register(EventKind::Modify, path);
            } else {
                self.ctx.ignore.register(EventKind::Create, path);
            }
            // some file systems report a second modification for the write
            self.ctx.ignore.register(EventKind::Modify, path);

            let offset = request.chunk_index * request.chunk_size;
            if let Err(err) = storage
                .persist(StorageKind::File, path, offset, &request.data)
                .await
            {
                error!(
                    chunk = request.chunk_index,
                    path,
                    error = %err,
                    "could not write chunk"
                );
            }
        } else {
            let exists = storage
                .exists(StorageKind::Directory, path)
                .await
                .unwrap_or(false);
            if !exists {
                self.ctx.ignore.register(EventKind::Create, path);
                if let Err(err) = storage.persist(StorageKind::Directory, path, 0, &[]).await {
                    error!(path, error = %err, "could not create directory");
                }
            }
        }
    }

    /// Decide what to ask for next once the final chunk has landed
    ///
    /// A missing request checksum counts as success: the sender failed to
    /// compute one and the transfer is accepted unverified.
    async fn verify_final_chunk(&self, request: &PushRequest, path: &str) -> i64 {
        let local_checksum = if request.is_file {
            match self.ctx.storage.checksum(path).await {
                Ok(checksum) => checksum,
                Err(err) => {
                    error!(
                        path,
                        error = %err,
                        "failed to compute checksum, accepting the file"
                    );
                    return -1;
                }
            }
        } else {
            // directories have no checksum
            String::new()
        };

        match &request.checksum {
            None => {
                info!(path, "no checksum provided, accepting transfer unverified");
                self.ctx.ignore.drain_modify(path);
                -1
            }
            Some(expected) if *expected == local_checksum => {
                info!(path, "checksums match, transfer complete");
                self.ctx.ignore.drain_modify(path);
                -1
            }
            Some(expected) => {
                info!(
                    path,
                    local = %local_checksum,
                    expected = %expected,
                    "checksum mismatch, requesting restart"
                );
                self.ctx.ignore.register(EventKind::Modify, path);
                if let Err(err) = self
                    .ctx
                    .storage
                    .persist(StorageKind::File, path, 0, &[])
                    .await
                {
                    error!(path, error = %err, "failed to truncate after mismatch");
                }
                0
            }
        }
    }

    async fn reply(&self, request: &PushRequest, status: StatusCode, requesting_chunk: i64) {
        let response = Message::PushResponse(PushResponse {
            header: self.ctx.response_header(&request.header, status),
            path: request.path.clone(),
            requesting_chunk,
        });
        if let Err(err) = self.ctx.reply(response).await {
            error!(
                exchange_id = %request.header.exchange_id,
                error = %err,
                "failed to send push response"
            );
        }
    }
}

#[async_trait]
impl IRequestHandler for PushRequestHandler {
    async fn handle(&self, request: Message) -> anyhow::Result<()> {
        let Message::PushRequest(request) = request else {
            return Err(ProtoError::UnexpectedMessage {
                exchange_id: request.header().exchange_id,
                expected: MessageKind::PushRequest,
                got: request.kind(),
            }
            .into());
        };

        let (path, shared_access) = match self.resolve_destination(&request).await? {
            Destination::Refused => {
                self.reply(&request, StatusCode::Denied, -1).await;
                return Ok(());
            }
            Destination::Known(path) => (path, None),
            Destination::SharedChild { path, access } => (path, Some(access)),
        };

        info!(
            exchange_id = %request.header.exchange_id,
            chunk = request.chunk_index,
            path = %path,
            "writing pushed chunk"
        );

        // sharing metadata rides on chunk 0; a freshly synthesized shared
        // child publishes its derived ownership right away
        if (request.chunk_index == 0 && shared_access.is_none()) || shared_access.is_some() {
            if let Err(err) = self
                .publish_metadata(&request, &path, shared_access)
                .await
            {
                warn!(path = %path, error = %err, "failed to publish sharing metadata");
            }
        }

        // a changed source means our partial copy may be longer than the
        // content now being sent; clear it before writing from scratch
        if request.is_file
            && request.header.status == StatusCode::FileChanged
            && self
                .ctx
                .storage
                .exists(StorageKind::File, &path)
                .await
                .unwrap_or(false)
        {
            self.ctx.ignore.register(EventKind::Modify, &path);
            if let Err(err) = self
                .ctx
                .storage
                .persist(StorageKind::File, &path, 0, &[])
                .await
            {
                error!(path = %path, error = %err, "failed to truncate changed file");
            }
        }

        self.write_chunk(&request, &path).await;

        let requesting_chunk = match request.total_chunks {
            Some(total) if request.chunk_index + 1 >= total => {
                self.verify_final_chunk(&request, &path).await
            }
            _ => request.chunk_index as i64 + 1,
        };

        self.reply(&request, StatusCode::Accepted, requesting_chunk).await;
        Ok(())
    }
}
