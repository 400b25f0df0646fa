//! Deletion propagation phase
//!
//! A single coordinator round: the initiator tells every accepted peer
//! what was deleted, each peer removes its local copy (and, for
//! directories, everything below it), and replies with a status. Before
//! any element is removed, the receiver ignore-marks its deletion and
//! strips the sharing metadata from its record - a failure to strip is
//! logged and does not stop the deletion. Deleting a path that is already
//! gone is ACCEPTED, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use peerdrive_core::domain::{
    AccessType, ClientDevice, EventKind, ExchangeId, StatusCode,
};
use peerdrive_core::ports::{IIdentifierMap, IStorage, IVersionStore, StorageKind};

use crate::context::NodeContext;
use crate::dispatch::IRequestHandler;
use crate::error::ProtoError;
use crate::exchange::ExchangeCoordinator;
use crate::message::{DeleteRequest, DeleteResponse, Message, MessageHeader, MessageKind};

/// Initiator side of the deletion phase
pub struct DeleteExchange {
    ctx: Arc<NodeContext>,
    coordinator: Arc<ExchangeCoordinator>,
    exchange_id: ExchangeId,
    path: String,
    audience: Vec<ClientDevice>,
}

impl DeleteExchange {
    pub fn new(
        ctx: Arc<NodeContext>,
        coordinator: Arc<ExchangeCoordinator>,
        exchange_id: ExchangeId,
        path: impl Into<String>,
        audience: Vec<ClientDevice>,
    ) -> Self {
        Self {
            ctx,
            coordinator,
            exchange_id,
            path: path.into(),
            audience,
        }
    }

    /// Tell every accepted peer about the deletion and collect replies
    #[instrument(skip(self), fields(exchange_id = %self.exchange_id, path = %self.path))]
    pub async fn run(&self, timeout: Duration) -> anyhow::Result<bool> {
        let owner = self
            .ctx
            .version_store
            .get_record(&self.path)
            .await?
            .and_then(|record| record.owner)
            .or_else(|| Some(self.ctx.username().to_string()));
        let file_id = self.ctx.identifier_map.lookup(&self.path).await?;

        let request = Message::DeleteRequest(DeleteRequest {
            header: MessageHeader::new(
                self.exchange_id,
                StatusCode::Accepted,
                self.ctx.device.clone(),
                self.ctx.device.address.clone(),
            ),
            path: self.path.clone(),
            owner,
            file_id,
        });

        let addresses: Vec<_> = self.audience.iter().map(|d| d.address.clone()).collect();
        let mut handle = self
            .coordinator
            .start(request, &addresses, MessageKind::DeleteResponse)
            .await;

        let completed = handle.await_completion(timeout).await;
        for response in handle.responses() {
            if response.header().status != StatusCode::Accepted {
                warn!(
                    peer = %response.header().sender,
                    status = %response.header().status,
                    "peer did not apply the deletion"
                );
            }
        }
        Ok(completed)
    }
}

/// Receiver side of the deletion phase
pub struct DeleteRequestHandler {
    ctx: Arc<NodeContext>,
}

impl DeleteRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn resolve_path(&self, request: &DeleteRequest) -> anyhow::Result<String> {
        if let Some(file_id) = request.file_id {
            if let Some(path) = self.ctx.identifier_map.resolve(&file_id).await? {
                return Ok(path);
            }
        }
        Ok(request.path.clone())
    }

    /// Ignore-mark and unshare one element that is about to disappear
    async fn prepare_element(&self, exchange_id: ExchangeId, element: &str) {
        self.ctx.ignore.register(EventKind::Delete, element);

        debug!(
            %exchange_id,
            path = element,
            "removing sharing information before deletion"
        );
        let stripped = async {
            if let Some(mut record) = self.ctx.version_store.get_record(element).await? {
                record.clear_sharing();
                self.ctx.version_store.write_record(&record).await?;
            }
            anyhow::Ok(())
        }
        .await;

        if let Err(err) = stripped {
            warn!(
                path = element,
                error = %err,
                "failed to strip sharing metadata, deleting anyway"
            );
        }
    }

    async fn reply(&self, request: &DeleteRequest, status: StatusCode) -> anyhow::Result<()> {
        let response = Message::DeleteResponse(DeleteResponse {
            header: self.ctx.response_header(&request.header, status),
        });
        self.ctx.reply(response).await
    }
}

#[async_trait]
impl IRequestHandler for DeleteRequestHandler {
    async fn handle(&self, request: Message) -> anyhow::Result<()> {
        let Message::DeleteRequest(request) = request else {
            return Err(ProtoError::UnexpectedMessage {
                exchange_id: request.header().exchange_id,
                expected: MessageKind::DeleteRequest,
                got: request.kind(),
            }
            .into());
        };

        let path = self.resolve_path(&request).await?;
        info!(
            exchange_id = %request.header.exchange_id,
            path = %path,
            "applying remote deletion"
        );

        let requester = &request.header.sender.username;
        if requester != self.ctx.username()
            && !self
                .ctx
                .access
                .has_access(requester, AccessType::Write, &path)
                .await?
        {
            warn!(
                exchange_id = %request.header.exchange_id,
                path = %path,
                requester = %requester,
                "deletion refused, missing write access"
            );
            return self.reply(&request, StatusCode::AccessDenied).await;
        }

        let storage = &self.ctx.storage;
        let exists = storage
            .exists(StorageKind::File, &path)
            .await
            .unwrap_or(false)
            || storage
                .exists(StorageKind::Directory, &path)
                .await
                .unwrap_or(false);

        if !exists {
            // already gone; deletion is idempotent
            debug!(path = %path, "path already absent, accepting");
            return self.reply(&request, StatusCode::Accepted).await;
        }

        let mut elements = vec![path.clone()];
        if storage.is_dir(&path).await.unwrap_or(false) {
            match storage.list_contents(&path).await {
                Ok(descendants) => elements.extend(descendants),
                Err(err) => {
                    warn!(path = %path, error = %err, "could not enumerate directory contents");
                }
            }
        }

        for element in &elements {
            self.prepare_element(request.header.exchange_id, element).await;
        }

        if let Err(err) = storage.delete(&path).await {
            warn!(path = %path, error = %err, "could not delete path");
            return self.reply(&request, StatusCode::Error).await;
        }

        self.reply(&request, StatusCode::Accepted).await
    }
}
