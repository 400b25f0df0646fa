//! Request dispatch
//!
//! Inbound requests are routed through an explicit handler table keyed by
//! [`MessageKind`]. A kind without a handler is logged and dropped.
//!
//! The dispatcher also owns the protocol's last-resort contract: if a
//! handler's body fails, the remote side still gets an ERROR-status
//! response so it is never left waiting for a reply that cannot come. A
//! failure to send even that response is logged and swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use peerdrive_core::domain::StatusCode;

use crate::context::NodeContext;
use crate::error::ProtoError;
use crate::message::{
    DeleteResponse, DemandResponse, Message, MessageKind, MoveResponse, OfferResponse,
    PushResponse,
};

/// Handles one kind of inbound request
#[async_trait]
pub trait IRequestHandler: Send + Sync {
    async fn handle(&self, request: Message) -> anyhow::Result<()>;
}

/// Routes inbound requests to their registered handlers
pub struct RequestDispatcher {
    ctx: Arc<NodeContext>,
    handlers: HashMap<MessageKind, Arc<dyn IRequestHandler>>,
}

impl RequestDispatcher {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            handlers: HashMap::new(),
        }
    }

    /// A dispatcher with every protocol phase handler wired in
    pub fn standard(ctx: Arc<NodeContext>) -> Self {
        let mut dispatcher = Self::new(ctx.clone());
        dispatcher.register(
            MessageKind::OfferRequest,
            Arc::new(crate::offer::OfferRequestHandler::new(ctx.clone())),
        );
        dispatcher.register(
            MessageKind::PushRequest,
            Arc::new(crate::push::PushRequestHandler::new(ctx.clone())),
        );
        dispatcher.register(
            MessageKind::DemandRequest,
            Arc::new(crate::demand::DemandRequestHandler::new(ctx.clone())),
        );
        dispatcher.register(
            MessageKind::DeleteRequest,
            Arc::new(crate::delete::DeleteRequestHandler::new(ctx.clone())),
        );
        dispatcher.register(
            MessageKind::MoveRequest,
            Arc::new(crate::relocate::MoveRequestHandler::new(ctx)),
        );
        dispatcher
    }

    /// Register (or replace) the handler for one request kind
    pub fn register(&mut self, kind: MessageKind, handler: Arc<dyn IRequestHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Route one inbound request to its handler
    pub async fn dispatch(&self, request: Message) {
        let kind = request.kind();
        let exchange_id = request.header().exchange_id;

        let Some(handler) = self.handlers.get(&kind) else {
            warn!(error = %ProtoError::NoHandler(kind), %exchange_id, "dropping request");
            return;
        };

        debug!(%exchange_id, %kind, sender = %request.header().sender, "dispatching request");

        if let Err(err) = handler.handle(request.clone()).await {
            error!(
                %exchange_id,
                %kind,
                error = %format!("{err:#}"),
                "request handler failed, sending error response"
            );
            self.send_error_response(&request).await;
        }
    }

    /// Best effort: tell the initiator the request blew up on our side
    async fn send_error_response(&self, request: &Message) {
        let Some(response) = error_response_for(&self.ctx, request) else {
            return;
        };

        if let Err(err) = self.ctx.reply(response).await {
            error!(
                exchange_id = %request.header().exchange_id,
                error = %err,
                "failed to notify initiator about handler error"
            );
        }
    }
}

/// The ERROR-status response matching a failed request, if the kind has one
fn error_response_for(ctx: &NodeContext, request: &Message) -> Option<Message> {
    let header = ctx.response_header(request.header(), StatusCode::Error);
    match request {
        Message::OfferRequest(req) => Some(Message::OfferResponse(OfferResponse {
            header,
            path: req.path.clone(),
        })),
        Message::PushRequest(req) => Some(Message::PushResponse(PushResponse {
            header,
            path: req.path.clone(),
            requesting_chunk: -1,
        })),
        Message::DemandRequest(req) => Some(Message::DemandResponse(DemandResponse {
            header,
            path: req.path.clone(),
            chunk_index: -1,
            total_chunks: -1,
            chunk_size: 0,
            checksum: None,
            is_file: true,
            sharers: Vec::new(),
            data: Vec::new(),
        })),
        Message::DeleteRequest(_) => Some(Message::DeleteResponse(DeleteResponse { header })),
        Message::MoveRequest(_) => Some(Message::MoveResponse(MoveResponse { header })),
        // responses have no counter-response
        _ => None,
    }
}
