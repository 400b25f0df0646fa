//! The per-event sync pipeline
//!
//! [`FileSyncer`] runs the full state machine for one local change:
//!
//! ```text
//! EchoCheck ──→ Offering ──→ Conflicted ──→ conflict copy, done
//!                        ├──→ Denied ─────→ reschedule original event
//!                        └──→ Accepted ───→ push | delete | move
//!                                           (accepted audience only)
//! ```
//!
//! Events are consumed strictly one at a time from a single queue, so two
//! transfers can never race on the same path's ignore markers or record.
//! Every wait is bounded; a phase that does not complete in time is
//! logged and abandoned with no retry. The one exception is a DENIED
//! offer, which re-enqueues the original event for a later run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use peerdrive_core::config::ProtocolConfig;
use peerdrive_core::domain::{ChangeEvent, ClientDevice, EventKind, ExchangeId};
use peerdrive_core::ports::{ILocations, IStorage};
use peerdrive_proto::context::NodeContext;
use peerdrive_proto::delete::DeleteExchange;
use peerdrive_proto::exchange::ExchangeCoordinator;
use peerdrive_proto::offer::{OfferExchange, OfferOutcome};
use peerdrive_proto::push::PushExchange;
use peerdrive_proto::relocate::MoveExchange;

use crate::conflict;

/// How one pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The event was an echo of our own prior write
    Suppressed,
    /// Directory modifications carry nothing to transfer
    SkippedDirectory,
    /// There was nobody to offer the change to
    NoTargets,
    /// A peer detected a concurrent edit; a conflict copy was created
    Conflicted,
    /// A peer denied the offer; the event was re-enqueued
    Rescheduled,
    /// The change propagated to every accepted peer
    Completed,
    /// A phase failed to complete within its bound
    Incomplete,
}

/// Drives the sync pipeline for each incoming change event
pub struct FileSyncer {
    ctx: Arc<NodeContext>,
    coordinator: Arc<ExchangeCoordinator>,
    locations: Arc<dyn ILocations>,
    protocol: ProtocolConfig,
    requeue: mpsc::Sender<ChangeEvent>,
}

impl FileSyncer {
    pub fn new(
        ctx: Arc<NodeContext>,
        coordinator: Arc<ExchangeCoordinator>,
        locations: Arc<dyn ILocations>,
        protocol: ProtocolConfig,
        requeue: mpsc::Sender<ChangeEvent>,
    ) -> Self {
        Self {
            ctx,
            coordinator,
            locations,
            protocol,
            requeue,
        }
    }

    /// Consume the watcher queue, synchronizing one event at a time
    pub async fn run(&self, mut events: mpsc::Receiver<ChangeEvent>) {
        info!("file syncer starting");
        while let Some(event) = events.recv().await {
            match self.sync(event).await {
                Ok(outcome) => debug!(?outcome, "pipeline run finished"),
                Err(err) => error!(error = %format!("{err:#}"), "pipeline run failed"),
            }
        }
        info!("file syncer stopped, event channel closed");
    }

    /// Run the full pipeline for one event
    #[instrument(skip(self, event), fields(kind = %event.kind, path = %event.path))]
    pub async fn sync(&self, event: ChangeEvent) -> anyhow::Result<SyncOutcome> {
        // echo of a write this node performed for a remote peer?
        if self.ctx.ignore.try_consume(event.kind, &event.path) {
            info!("suppressing echo of our own write");
            return Ok(SyncOutcome::Suppressed);
        }

        // directory content never travels; only structure matters
        if event.kind == EventKind::Modify
            && self.ctx.storage.is_dir(&event.path).await.unwrap_or(false)
        {
            debug!("skipping modify event for directory");
            return Ok(SyncOutcome::SkippedDirectory);
        }

        let targets: Vec<ClientDevice> = self
            .locations
            .locations()
            .await?
            .into_iter()
            .filter(|device| device.address != self.ctx.device.address)
            .collect();

        if targets.is_empty() {
            debug!("no other devices known, nothing to synchronize");
            return Ok(SyncOutcome::NoTargets);
        }

        let exchange_id = ExchangeId::new();
        info!(%exchange_id, targets = targets.len(), "starting offer round");

        let offer = OfferExchange::new(
            self.ctx.clone(),
            self.coordinator.clone(),
            exchange_id,
            event.clone(),
            targets,
        );

        match offer.run(self.protocol.offer_timeout()).await? {
            OfferOutcome::Incomplete => {
                error!(%exchange_id, "no result received from peers, aborting offer");
                Ok(SyncOutcome::Incomplete)
            }
            OfferOutcome::Conflicted => {
                let copy = conflict::create_conflict_copy(&self.ctx, &event.path).await?;
                // the copy synchronizes as a change of its own
                if let Err(err) = self.requeue.try_send(ChangeEvent::created(&copy, None)) {
                    warn!(copy = %copy, error = %err, "could not enqueue conflict copy event");
                }
                Ok(SyncOutcome::Conflicted)
            }
            OfferOutcome::Denied => {
                info!(%exchange_id, "offer denied, rescheduling event");
                if let Err(err) = self.requeue.try_send(event) {
                    warn!(error = %err, "could not reschedule denied event");
                }
                Ok(SyncOutcome::Rescheduled)
            }
            OfferOutcome::Accepted { audience } => {
                if audience.is_empty() {
                    debug!(%exchange_id, "nobody needs this change");
                    return Ok(SyncOutcome::Completed);
                }
                self.propagate(exchange_id, &event, audience).await
            }
        }
    }

    /// Run the propagation phase matching the event kind
    async fn propagate(
        &self,
        exchange_id: ExchangeId,
        event: &ChangeEvent,
        audience: Vec<ClientDevice>,
    ) -> anyhow::Result<SyncOutcome> {
        info!(
            %exchange_id,
            audience = audience.len(),
            "offer accepted, propagating"
        );
        let timeout = self.protocol.exchange_timeout();

        let completed = match event.kind {
            EventKind::Delete => {
                DeleteExchange::new(
                    self.ctx.clone(),
                    self.coordinator.clone(),
                    exchange_id,
                    event.path.clone(),
                    audience,
                )
                .run(timeout)
                .await?
            }
            EventKind::Move => {
                let new_path = event
                    .new_path
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("move event without destination path"))?;
                MoveExchange::new(
                    self.ctx.clone(),
                    self.coordinator.clone(),
                    exchange_id,
                    event.path.clone(),
                    new_path,
                    audience,
                )
                .run(timeout)
                .await?
            }
            EventKind::Create | EventKind::Modify => {
                PushExchange::new(
                    self.ctx.clone(),
                    exchange_id,
                    event.path.clone(),
                    audience,
                )
                .run(timeout)
                .await?
            }
        };

        if completed {
            info!(%exchange_id, "propagation completed");
            Ok(SyncOutcome::Completed)
        } else {
            error!(%exchange_id, "no result received from peers, aborting sync");
            Ok(SyncOutcome::Incomplete)
        }
    }
}
