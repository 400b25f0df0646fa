//! Demand transfer phase (pull)
//!
//! The mirror image of push, used when this node knows a specific peer
//! has content it lacks: the puller requests chunk after chunk from one
//! fixed source and writes them locally, with the same ignore-marking
//! and checksum discipline as the push receiver.
//!
//! One logical pull issues many sequential requests under a single
//! exchange id, so the coordinator's one-reply-per-target collector does
//! not fit; the puller owns a private channel its responses are forwarded
//! into and drives an explicit loop - never recursion - with one overall
//! deadline for the whole transfer. A response of `(-1, -1)` means the
//! source no longer has the file or refused us, and ends the pull as a
//! failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use peerdrive_core::domain::{
    AccessType, EventKind, ExchangeId, PeerAddress, StatusCode,
};
use peerdrive_core::ports::{IStorage, IVersionStore, StorageKind};

use crate::context::NodeContext;
use crate::dispatch::IRequestHandler;
use crate::error::ProtoError;
use crate::message::{DemandRequest, DemandResponse, Message, MessageHeader, MessageKind};
use crate::transport::{IResponseCallback, ITransport};

/// Forwards an exchange's responses into a private channel
struct ForwardingCallback {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl IResponseCallback for ForwardingCallback {
    async fn on_response(&self, response: Message) {
        if self.tx.send(response).await.is_err() {
            debug!("demand response arrived after the pull ended, dropping");
        }
    }
}

/// Initiator (pulling) side of the demand phase
pub struct DemandExchange {
    ctx: Arc<NodeContext>,
    exchange_id: ExchangeId,
    source: PeerAddress,
    path: String,
}

impl DemandExchange {
    pub fn new(
        ctx: Arc<NodeContext>,
        exchange_id: ExchangeId,
        source: PeerAddress,
        path: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            exchange_id,
            source,
            path: path.into(),
        }
    }

    /// Pull the file from the source peer, waiting up to `timeout` overall
    ///
    /// Returns whether the transfer completed with verified (or
    /// unverifiable) content. Every failure mode - source gone, denial,
    /// deadline - comes back as `false`.
    #[instrument(skip(self), fields(exchange_id = %self.exchange_id, path = %self.path))]
    pub async fn run(&self, timeout: Duration) -> anyhow::Result<bool> {
        let (tx, mut rx) = mpsc::channel(8);
        self.ctx.transport.register_response_callback(
            self.exchange_id,
            Arc::new(ForwardingCallback { tx }),
        );

        let result = self.pull_loop(&mut rx, timeout).await;

        self.ctx
            .transport
            .unregister_response_callback(&self.exchange_id);
        result
    }

    async fn pull_loop(
        &self,
        rx: &mut mpsc::Receiver<Message>,
        timeout: Duration,
    ) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut chunk_index: i64 = 0;

        loop {
            self.request_chunk(chunk_index as u64).await?;

            let response = loop {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    warn!("pull deadline expired");
                    return Ok(false);
                };
                match tokio::time::timeout(remaining, rx.recv()).await {
                    Err(_) => {
                        warn!("pull deadline expired while waiting for a chunk");
                        return Ok(false);
                    }
                    Ok(None) => {
                        warn!("pull channel closed");
                        return Ok(false);
                    }
                    Ok(Some(Message::DemandResponse(response))) => break response,
                    Ok(Some(other)) => {
                        let err = ProtoError::UnexpectedMessage {
                            exchange_id: self.exchange_id,
                            expected: MessageKind::DemandResponse,
                            got: other.kind(),
                        };
                        warn!(error = %err, "discarding response");
                    }
                }
            };

            if response.chunk_index == -1 && response.total_chunks == -1 {
                warn!(
                    source = %self.source,
                    "source no longer has the file or denied the demand"
                );
                return Ok(false);
            }

            self.write_chunk(&response).await;

            if chunk_index == response.total_chunks {
                // last round: the source said this is everything
                match self.verify(&response).await {
                    Verdict::Done => return Ok(true),
                    Verdict::Restart => {
                        // -1 so the increment below requests chunk 0 again
                        chunk_index = -1;
                        self.truncate(&response).await;
                    }
                }
            } else if response.total_chunks < chunk_index {
                debug!(
                    total = response.total_chunks,
                    index = chunk_index,
                    "source shrank mid-pull, restarting"
                );
                chunk_index = -1;
                self.truncate(&response).await;
            }

            chunk_index += 1;
        }
    }

    async fn request_chunk(&self, chunk_index: u64) -> anyhow::Result<()> {
        debug!(chunk_index, "requesting chunk");
        let request = Message::DemandRequest(DemandRequest {
            header: MessageHeader::new(
                self.exchange_id,
                StatusCode::Accepted,
                self.ctx.device.clone(),
                self.source.clone(),
            ),
            path: self.path.clone(),
            chunk_index,
        });
        self.ctx.transport.send_direct(&self.source, request).await
    }

    /// Ignore-mark and write one received chunk
    async fn write_chunk(&self, response: &DemandResponse) {
        if response.chunk_index < 0 {
            return;
        }

        let storage = &self.ctx.storage;
        if response.chunk_index > 0 {
            self.ctx.ignore.register(EventKind::Modify, &self.path);
        } else {
            let exists = storage
                .exists(StorageKind::File, &self.path)
                .await
                .unwrap_or(false)
                || storage
                    .exists(StorageKind::Directory, &self.path)
                    .await
                    .unwrap_or(false);
            if exists {
                self.ctx.ignore.register(EventKind::Modify, &self.path);
            } else {
                self.ctx.ignore.register(EventKind::Create, &self.path);
                // first sight of the file: adopt the sharing metadata the
                // source attached
                if !response.sharers.is_empty() {
                    if let Err(err) = self.publish_sharers(response).await {
                        warn!(error = %err, "failed to publish sharers for pulled file");
                    }
                }
            }
        }

        if response.is_file {
            let offset = response.chunk_index as u64 * response.chunk_size;
            if let Err(err) = storage
                .persist(StorageKind::File, &self.path, offset, &response.data)
                .await
            {
                error!(
                    chunk = response.chunk_index,
                    path = %self.path,
                    error = %err,
                    "could not write pulled chunk"
                );
            }
        } else {
            let exists = storage
                .exists(StorageKind::Directory, &self.path)
                .await
                .unwrap_or(false);
            if !exists {
                if let Err(err) = storage
                    .persist(StorageKind::Directory, &self.path, 0, &[])
                    .await
                {
                    error!(path = %self.path, error = %err, "could not create pulled directory");
                }
            }
        }
    }

    async fn publish_sharers(&self, response: &DemandResponse) -> anyhow::Result<()> {
        let mut record = self
            .ctx
            .version_store
            .get_record(&self.path)
            .await?
            .unwrap_or_else(|| peerdrive_core::domain::PathRecord {
                path: self.path.clone(),
                owner: None,
                is_shared: false,
                access_type: None,
                sharers: Vec::new(),
                versions: Vec::new(),
            });
        for sharer in &response.sharers {
            record.add_sharer(sharer.clone());
        }
        self.ctx.version_store.write_record(&record).await
    }

    async fn verify(&self, response: &DemandResponse) -> Verdict {
        let local_checksum = if response.is_file {
            match self.ctx.storage.checksum(&self.path).await {
                Ok(checksum) => checksum,
                Err(err) => {
                    error!(
                        path = %self.path,
                        error = %err,
                        "failed to compute checksum, accepting the file"
                    );
                    return Verdict::Done;
                }
            }
        } else {
            String::new()
        };

        match &response.checksum {
            None => {
                info!(path = %self.path, "no checksum from source, accepting unverified");
                Verdict::Done
            }
            Some(expected) if *expected == local_checksum => {
                info!(path = %self.path, "checksums match, pull complete");
                Verdict::Done
            }
            Some(expected) => {
                info!(
                    path = %self.path,
                    local = %local_checksum,
                    expected = %expected,
                    "checksum mismatch, restarting pull"
                );
                Verdict::Restart
            }
        }
    }

    async fn truncate(&self, response: &DemandResponse) {
        self.ctx.ignore.register(EventKind::Modify, &self.path);
        let result = if response.is_file {
            self.ctx
                .storage
                .persist(StorageKind::File, &self.path, 0, &[])
                .await
        } else {
            self.ctx
                .storage
                .persist(StorageKind::Directory, &self.path, 0, &[])
                .await
        };
        if let Err(err) = result {
            error!(path = %self.path, error = %err, "failed to clear partial pull");
        }
    }
}

enum Verdict {
    Done,
    Restart,
}

// ===========================================================================
// Source side
// ===========================================================================

/// Source side of the demand phase
pub struct DemandRequestHandler {
    ctx: Arc<NodeContext>,
}

impl DemandRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// The `(-1, -1)` reply: gone, or not yours to read
    async fn refuse(&self, request: &DemandRequest, status: StatusCode) {
        let response = Message::DemandResponse(DemandResponse {
            header: self.ctx.response_header(&request.header, status),
            path: request.path.clone(),
            chunk_index: -1,
            total_chunks: -1,
            chunk_size: 0,
            checksum: None,
            is_file: true,
            sharers: Vec::new(),
            data: Vec::new(),
        });
        if let Err(err) = self.ctx.reply(response).await {
            error!(
                exchange_id = %request.header.exchange_id,
                error = %err,
                "failed to send demand refusal"
            );
        }
    }
}

#[async_trait]
impl IRequestHandler for DemandRequestHandler {
    async fn handle(&self, request: Message) -> anyhow::Result<()> {
        let Message::DemandRequest(request) = request else {
            return Err(ProtoError::UnexpectedMessage {
                exchange_id: request.header().exchange_id,
                expected: MessageKind::DemandRequest,
                got: request.kind(),
            }
            .into());
        };

        let requester = &request.header.sender.username;
        if requester != self.ctx.username()
            && !self
                .ctx
                .access
                .has_access(requester, AccessType::Read, &request.path)
                .await?
        {
            warn!(
                exchange_id = %request.header.exchange_id,
                path = %request.path,
                requester = %requester,
                "refusing demand, missing read access"
            );
            self.refuse(&request, StatusCode::Denied).await;
            return Ok(());
        }

        let storage = &self.ctx.storage;
        let is_file = storage
            .exists(StorageKind::File, &request.path)
            .await
            .unwrap_or(false);
        let is_dir = storage
            .exists(StorageKind::Directory, &request.path)
            .await
            .unwrap_or(false);
        if !is_file && !is_dir {
            info!(path = %request.path, "demanded path is gone");
            self.refuse(&request, StatusCode::Accepted).await;
            return Ok(());
        }

        let chunk_size = self.ctx.sync_config.chunk_size;
        let (total_chunks, data) = if is_file {
            let size = storage.size(&request.path).await?;
            let total = size.div_ceil(chunk_size) as i64;
            let data = storage
                .read(&request.path, request.chunk_index * chunk_size, chunk_size)
                .await?;
            (total, data)
        } else {
            (1, Vec::new())
        };

        // the checksum is only needed once the puller reaches the end
        let checksum = if is_file && request.chunk_index as i64 + 1 >= total_chunks {
            Some(storage.checksum(&request.path).await?)
        } else {
            None
        };

        let sharers = self
            .ctx
            .version_store
            .get_record(&request.path)
            .await?
            .map(|record| record.sharers)
            .unwrap_or_default();

        debug!(
            exchange_id = %request.header.exchange_id,
            chunk = request.chunk_index,
            total = total_chunks,
            bytes = data.len(),
            "serving demanded chunk"
        );

        let response = Message::DemandResponse(DemandResponse {
            header: self.ctx.response_header(&request.header, StatusCode::Accepted),
            path: request.path.clone(),
            chunk_index: request.chunk_index as i64,
            total_chunks,
            chunk_size,
            checksum,
            is_file,
            sharers,
            data,
        });
        self.ctx.reply(response).await
    }
}
