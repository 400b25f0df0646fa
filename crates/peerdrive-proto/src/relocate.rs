//! Move propagation phase
//!
//! A single coordinator round carrying `{old_path, new_path, is_file}`.
//! To a naive watcher a rename is indistinguishable from a delete at the
//! old path plus a create at the new one, so the receiver ignore-marks
//! both before touching storage (and a trailing modify for files, which
//! some filesystems fire after a rename).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use peerdrive_core::domain::{AccessType, ClientDevice, EventKind, ExchangeId, StatusCode};
use peerdrive_core::ports::{IIdentifierMap, IStorage, IVersionStore};

use crate::context::NodeContext;
use crate::dispatch::IRequestHandler;
use crate::error::ProtoError;
use crate::exchange::ExchangeCoordinator;
use crate::message::{Message, MessageHeader, MessageKind, MoveRequest, MoveResponse};

/// Initiator side of the move phase
pub struct MoveExchange {
    ctx: Arc<NodeContext>,
    coordinator: Arc<ExchangeCoordinator>,
    exchange_id: ExchangeId,
    old_path: String,
    new_path: String,
    audience: Vec<ClientDevice>,
}

impl MoveExchange {
    pub fn new(
        ctx: Arc<NodeContext>,
        coordinator: Arc<ExchangeCoordinator>,
        exchange_id: ExchangeId,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
        audience: Vec<ClientDevice>,
    ) -> Self {
        Self {
            ctx,
            coordinator,
            exchange_id,
            old_path: old_path.into(),
            new_path: new_path.into(),
            audience,
        }
    }

    /// Tell every accepted peer about the rename and collect replies
    #[instrument(
        skip(self),
        fields(exchange_id = %self.exchange_id, old = %self.old_path, new = %self.new_path)
    )]
    pub async fn run(&self, timeout: Duration) -> anyhow::Result<bool> {
        let is_file = !self
            .ctx
            .storage
            .is_dir(&self.new_path)
            .await
            .unwrap_or(false);

        let request = Message::MoveRequest(MoveRequest {
            header: MessageHeader::new(
                self.exchange_id,
                StatusCode::Accepted,
                self.ctx.device.clone(),
                self.ctx.device.address.clone(),
            ),
            old_path: self.old_path.clone(),
            new_path: self.new_path.clone(),
            is_file,
        });

        let addresses: Vec<_> = self.audience.iter().map(|d| d.address.clone()).collect();
        let mut handle = self
            .coordinator
            .start(request, &addresses, MessageKind::MoveResponse)
            .await;

        let completed = handle.await_completion(timeout).await;
        for response in handle.responses() {
            if response.header().status != StatusCode::Accepted {
                warn!(
                    peer = %response.header().sender,
                    status = %response.header().status,
                    "peer did not apply the move"
                );
            }
        }
        Ok(completed)
    }
}

/// Receiver side of the move phase
pub struct MoveRequestHandler {
    ctx: Arc<NodeContext>,
}

impl MoveRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn reply(&self, request: &MoveRequest, status: StatusCode) -> anyhow::Result<()> {
        let response = Message::MoveResponse(MoveResponse {
            header: self.ctx.response_header(&request.header, status),
        });
        self.ctx.reply(response).await
    }
}

#[async_trait]
impl IRequestHandler for MoveRequestHandler {
    async fn handle(&self, request: Message) -> anyhow::Result<()> {
        let Message::MoveRequest(request) = request else {
            return Err(ProtoError::UnexpectedMessage {
                exchange_id: request.header().exchange_id,
                expected: MessageKind::MoveRequest,
                got: request.kind(),
            }
            .into());
        };

        info!(
            exchange_id = %request.header.exchange_id,
            old = %request.old_path,
            new = %request.new_path,
            "applying remote move"
        );

        let requester = &request.header.sender.username;
        if requester != self.ctx.username()
            && !self
                .ctx
                .access
                .has_access(requester, AccessType::Write, &request.old_path)
                .await?
        {
            warn!(
                exchange_id = %request.header.exchange_id,
                path = %request.old_path,
                requester = %requester,
                "move refused, missing write access"
            );
            return self.reply(&request, StatusCode::AccessDenied).await;
        }

        self.ctx.ignore.register(EventKind::Delete, &request.old_path);
        self.ctx.ignore.register(EventKind::Create, &request.new_path);
        if request.is_file {
            self.ctx.ignore.register(EventKind::Modify, &request.new_path);
        }

        if let Err(err) = self
            .ctx
            .storage
            .rename(&request.old_path, &request.new_path)
            .await
        {
            warn!(
                old = %request.old_path,
                new = %request.new_path,
                error = %err,
                "could not rename path"
            );
            return self.reply(&request, StatusCode::Error).await;
        }

        // carry the record and the durable id over to the new path
        let moved = async {
            if let Some(mut record) = self
                .ctx
                .version_store
                .get_record(&request.old_path)
                .await?
            {
                record.path = request.new_path.clone();
                self.ctx.version_store.write_record(&record).await?;
            }
            if let Some(file_id) = self.ctx.identifier_map.lookup(&request.old_path).await? {
                self.ctx
                    .identifier_map
                    .register(&request.new_path, file_id)
                    .await?;
            }
            anyhow::Ok(())
        }
        .await;

        if let Err(err) = moved {
            warn!(
                new = %request.new_path,
                error = %err,
                "failed to move tracking metadata"
            );
        }

        self.reply(&request, StatusCode::Accepted).await
    }
}
