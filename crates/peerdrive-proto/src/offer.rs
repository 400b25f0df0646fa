//! Offer negotiation phase
//!
//! Before any content or structural change propagates, the initiator asks
//! every target peer whether the change may proceed. Each recipient
//! answers independently:
//!
//! 1. CONFLICT - its own latest version diverges from the offered baseline
//! 2. DENIED - the requesting user lacks WRITE on the path
//! 3. ACCEPTED - otherwise; the recipient now expects the follow-up phase
//!
//! Aggregation at the initiator is not a vote: a single CONFLICT decides
//! the round no matter what else came back, a single DENIED decides it in
//! the absence of conflicts, and only a clean sweep of ACCEPTED replies
//! lets propagation start - addressed exclusively at the peers that
//! accepted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use peerdrive_core::domain::{
    ChangeEvent, ClientDevice, EventKind, ExchangeId, StatusCode, VersionHash,
};
use peerdrive_core::ports::{IStorage, IVersionStore};

use crate::context::NodeContext;
use crate::dispatch::IRequestHandler;
use crate::error::ProtoError;
use crate::exchange::ExchangeCoordinator;
use crate::message::{Message, MessageHeader, MessageKind, OfferRequest, OfferResponse};

/// Aggregated verdict of one offer round
#[derive(Debug, Clone, PartialEq)]
pub enum OfferOutcome {
    /// Every reply was ACCEPTED; propagate to exactly these peers
    Accepted { audience: Vec<ClientDevice> },
    /// At least one peer denied and none conflicted
    Denied,
    /// At least one peer detected a concurrent divergent edit
    Conflicted,
    /// Not every peer replied within the bound
    Incomplete,
}

/// Initiator side of the offer phase
pub struct OfferExchange {
    ctx: Arc<NodeContext>,
    coordinator: Arc<ExchangeCoordinator>,
    exchange_id: ExchangeId,
    event: ChangeEvent,
    targets: Vec<ClientDevice>,
}

impl OfferExchange {
    pub fn new(
        ctx: Arc<NodeContext>,
        coordinator: Arc<ExchangeCoordinator>,
        exchange_id: ExchangeId,
        event: ChangeEvent,
        targets: Vec<ClientDevice>,
    ) -> Self {
        Self {
            ctx,
            coordinator,
            exchange_id,
            event,
            targets,
        }
    }

    /// Broadcast the offer and aggregate the replies
    #[instrument(skip(self), fields(exchange_id = %self.exchange_id, path = %self.event.path))]
    pub async fn run(&self, timeout: Duration) -> anyhow::Result<OfferOutcome> {
        let is_file = !self
            .ctx
            .storage
            .is_dir(&self.event.path)
            .await
            .unwrap_or(false);

        let request = Message::OfferRequest(OfferRequest {
            header: MessageHeader::new(
                self.exchange_id,
                StatusCode::Accepted,
                self.ctx.device.clone(),
                self.ctx.device.address.clone(),
            ),
            event_kind: self.event.kind,
            path: self.event.path.clone(),
            new_path: self.event.new_path.clone(),
            is_file,
            baseline: self.event.hash.clone(),
        });

        let addresses: Vec<_> = self.targets.iter().map(|d| d.address.clone()).collect();
        let mut handle = self
            .coordinator
            .start(request, &addresses, MessageKind::OfferResponse)
            .await;

        if !handle.await_completion(timeout).await {
            warn!(
                replies = handle.responses().len(),
                targets = self.targets.len(),
                "offer round did not complete in time"
            );
            return Ok(OfferOutcome::Incomplete);
        }

        let outcome = aggregate(&handle.responses());
        info!(outcome = outcome_label(&outcome), "offer round settled");
        Ok(outcome)
    }
}

fn outcome_label(outcome: &OfferOutcome) -> &'static str {
    match outcome {
        OfferOutcome::Accepted { .. } => "accepted",
        OfferOutcome::Denied => "denied",
        OfferOutcome::Conflicted => "conflicted",
        OfferOutcome::Incomplete => "incomplete",
    }
}

/// Fold offer replies into a verdict; order never matters
pub fn aggregate(responses: &[Message]) -> OfferOutcome {
    let mut denied = false;
    let mut audience = Vec::new();

    for response in responses {
        match response.header().status {
            StatusCode::Conflict => return OfferOutcome::Conflicted,
            StatusCode::Accepted => audience.push(response.header().sender.clone()),
            // anything not accepted keeps this round from propagating
            _ => denied = true,
        }
    }

    if denied {
        OfferOutcome::Denied
    } else {
        OfferOutcome::Accepted { audience }
    }
}

/// Receiver side of the offer phase
pub struct OfferRequestHandler {
    ctx: Arc<NodeContext>,
}

impl OfferRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn evaluate(&self, request: &OfferRequest) -> anyhow::Result<StatusCode> {
        // structural changes carry no new content; only create/modify
        // offers can collide with an independent edit
        if matches!(request.event_kind, EventKind::Create | EventKind::Modify) {
            if let Some(record) = self.ctx.version_store.get_record(&request.path).await? {
                if diverges(record.latest_hash(), request.baseline.as_ref()) {
                    debug!(
                        path = %request.path,
                        local = ?record.latest_hash().map(VersionHash::as_str),
                        baseline = ?request.baseline.as_ref().map(VersionHash::as_str),
                        "offer conflicts with local version"
                    );
                    return Ok(StatusCode::Conflict);
                }
            }
        }

        let requester = &request.header.sender.username;
        if requester != self.ctx.username() {
            let gate_path = nearest_recorded_path(&self.ctx.version_store, &request.path).await?;
            let allowed = match gate_path {
                Some(path) => {
                    self.ctx
                        .access
                        .has_access(requester, peerdrive_core::domain::AccessType::Write, &path)
                        .await?
                }
                None => false,
            };
            if !allowed {
                debug!(path = %request.path, requester = %requester, "offer denied, no write access");
                return Ok(StatusCode::Denied);
            }
        }

        Ok(StatusCode::Accepted)
    }
}

/// Whether a local version and an offered baseline indicate concurrent edits
///
/// A missing local version can never conflict; a local version with no
/// offered baseline means both sides created the path independently.
fn diverges(local: Option<&VersionHash>, baseline: Option<&VersionHash>) -> bool {
    match (local, baseline) {
        (Some(local), Some(baseline)) => local != baseline,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// The path itself, or its nearest ancestor that has a version record
///
/// New files inside a shared folder arrive under paths we have no record
/// for yet; the capability that matters is the one on the shared ancestor.
async fn nearest_recorded_path(
    version_store: &Arc<dyn IVersionStore>,
    path: &str,
) -> anyhow::Result<Option<String>> {
    let mut current = Some(Path::new(path));
    while let Some(candidate) = current {
        let candidate_str = candidate.to_string_lossy();
        if !candidate_str.is_empty()
            && version_store.get_record(&candidate_str).await?.is_some()
        {
            return Ok(Some(candidate_str.into_owned()));
        }
        current = candidate.parent();
    }
    Ok(None)
}

#[async_trait]
impl IRequestHandler for OfferRequestHandler {
    async fn handle(&self, request: Message) -> anyhow::Result<()> {
        let Message::OfferRequest(request) = request else {
            return Err(ProtoError::UnexpectedMessage {
                exchange_id: request.header().exchange_id,
                expected: MessageKind::OfferRequest,
                got: request.kind(),
            }
            .into());
        };

        let status = self.evaluate(&request).await?;
        info!(
            exchange_id = %request.header.exchange_id,
            path = %request.path,
            %status,
            "answering offer"
        );

        let response = Message::OfferResponse(OfferResponse {
            header: self.ctx.response_header(&request.header, status),
            path: request.path,
        });
        self.ctx.reply(response).await
    }
}

#[cfg(test)]
mod tests {
    use peerdrive_core::domain::{DeviceId, PeerAddress};

    use super::*;
    use crate::message::OfferResponse;

    fn reply(status: StatusCode, name: &str) -> Message {
        Message::OfferResponse(OfferResponse {
            header: MessageHeader::new(
                ExchangeId::new(),
                status,
                ClientDevice::new(name, DeviceId::new(), PeerAddress::new(name, 7)),
                PeerAddress::new("initiator", 1),
            ),
            path: "a.txt".into(),
        })
    }

    #[test]
    fn test_aggregate_all_accepted() {
        let outcome = aggregate(&[
            reply(StatusCode::Accepted, "b"),
            reply(StatusCode::Accepted, "c"),
        ]);
        let OfferOutcome::Accepted { audience } = outcome else {
            panic!("expected accepted");
        };
        let names: Vec<_> = audience.iter().map(|d| d.username.clone()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_aggregate_conflict_beats_everything() {
        // conflict wins regardless of position
        for order in [
            vec![
                reply(StatusCode::Conflict, "b"),
                reply(StatusCode::Denied, "c"),
            ],
            vec![
                reply(StatusCode::Denied, "b"),
                reply(StatusCode::Conflict, "c"),
            ],
            vec![
                reply(StatusCode::Accepted, "b"),
                reply(StatusCode::Conflict, "c"),
            ],
        ] {
            assert_eq!(aggregate(&order), OfferOutcome::Conflicted);
        }
    }

    #[test]
    fn test_aggregate_denied_beats_accepted() {
        for order in [
            vec![
                reply(StatusCode::Denied, "b"),
                reply(StatusCode::Accepted, "c"),
            ],
            vec![
                reply(StatusCode::Accepted, "b"),
                reply(StatusCode::Denied, "c"),
            ],
        ] {
            assert_eq!(aggregate(&order), OfferOutcome::Denied);
        }
    }

    #[test]
    fn test_aggregate_error_counts_as_denied() {
        assert_eq!(
            aggregate(&[
                reply(StatusCode::Accepted, "b"),
                reply(StatusCode::Error, "c")
            ]),
            OfferOutcome::Denied
        );
    }

    #[test]
    fn test_aggregate_empty_is_accepted_with_no_audience() {
        assert_eq!(
            aggregate(&[]),
            OfferOutcome::Accepted {
                audience: Vec::new()
            }
        );
    }

    #[test]
    fn test_diverges_table() {
        let v1 = VersionHash::new("v1").unwrap();
        let v2 = VersionHash::new("v2").unwrap();

        assert!(!diverges(None, None));
        assert!(!diverges(None, Some(&v1)));
        assert!(diverges(Some(&v1), None));
        assert!(diverges(Some(&v1), Some(&v2)));
        assert!(!diverges(Some(&v1), Some(&v1)));
    }
}
