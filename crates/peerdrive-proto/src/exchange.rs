//! Exchange coordinator
//!
//! The generic engine under every single-round protocol phase: send one
//! typed request to N peers, collect one reply of the expected kind per
//! peer, or report the phase incomplete after a bounded wait.
//!
//! ```text
//! start(request, targets, expected)
//!    │ register collector under the exchange id
//!    │ send request to every target
//!    ▼
//! ExchangeHandle ── await_completion(timeout) ──► true  (all replies in)
//!                                            └──► false (deadline hit)
//! ```
//!
//! Completion is signalled through a private `oneshot` owned by the
//! handle; the response delivery that records the last missing reply -
//! and only that delivery - fires it. Responses of the wrong kind are
//! logged and discarded without counting, so a peer answering nonsense
//! shows up as a timeout, not a crash. The collector is deregistered from
//! the transport exactly once, whether the phase completed or timed out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use peerdrive_core::domain::{ExchangeId, PeerAddress};

use crate::error::ProtoError;
use crate::message::{Message, MessageKind};
use crate::transport::{IResponseCallback, ITransport};

/// Accumulates the responses of one exchange
pub struct ResponseCollector {
    exchange_id: ExchangeId,
    expected: MessageKind,
    target_count: usize,
    inner: Mutex<CollectorInner>,
    completed: AtomicBool,
}

struct CollectorInner {
    responses: Vec<Message>,
    done: Option<oneshot::Sender<()>>,
}

impl ResponseCollector {
    fn new(
        exchange_id: ExchangeId,
        expected: MessageKind,
        target_count: usize,
        done: oneshot::Sender<()>,
    ) -> Self {
        Self {
            exchange_id,
            expected,
            target_count,
            inner: Mutex::new(CollectorInner {
                responses: Vec::with_capacity(target_count),
                done: Some(done),
            }),
            completed: AtomicBool::new(false),
        }
    }

    fn responses(&self) -> Vec<Message> {
        self.inner
            .lock()
            .expect("collector lock poisoned")
            .responses
            .clone()
    }
}

#[async_trait]
impl IResponseCallback for ResponseCollector {
    async fn on_response(&self, response: Message) {
        if response.kind() != self.expected {
            let err = ProtoError::UnexpectedMessage {
                exchange_id: self.exchange_id,
                expected: self.expected,
                got: response.kind(),
            };
            warn!(error = %err, "discarding response of unexpected kind");
            return;
        }

        let mut inner = self.inner.lock().expect("collector lock poisoned");
        if inner.responses.len() >= self.target_count {
            debug!(
                exchange_id = %self.exchange_id,
                "late response after completion, discarding"
            );
            return;
        }

        debug!(
            exchange_id = %self.exchange_id,
            sender = %response.header().sender,
            received = inner.responses.len() + 1,
            expected = self.target_count,
            "recorded response"
        );
        inner.responses.push(response);

        if inner.responses.len() == self.target_count {
            // taking the sender under the lock guarantees a single signal
            self.completed.store(true, Ordering::Release);
            if let Some(done) = inner.done.take() {
                let _ = done.send(());
            }
        }
    }
}

/// Handle to one running exchange
///
/// Dropping the handle deregisters the collector if
/// [`await_completion`](ExchangeHandle::await_completion) never got to.
pub struct ExchangeHandle {
    exchange_id: ExchangeId,
    transport: Arc<dyn ITransport>,
    collector: Arc<ResponseCollector>,
    done_rx: Option<oneshot::Receiver<()>>,
    deregistered: AtomicBool,
}

impl ExchangeHandle {
    /// Wait up to `timeout` for every target to reply
    ///
    /// Returns whether the exchange completed. Expiry of the bound is a
    /// normal outcome, not an error; the background exchange state is
    /// deregistered either way.
    pub async fn await_completion(&mut self, timeout: Duration) -> bool {
        if !self.is_completed() {
            if let Some(done_rx) = self.done_rx.take() {
                let _ = tokio::time::timeout(timeout, done_rx).await;
            }
        }

        self.deregister();
        self.is_completed()
    }

    /// Whether a correct-kind reply has been recorded for every target
    pub fn is_completed(&self) -> bool {
        self.collector.completed.load(Ordering::Acquire)
    }

    /// The responses recorded so far
    pub fn responses(&self) -> Vec<Message> {
        self.collector.responses()
    }

    /// The id of the exchange this handle runs
    pub fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    fn deregister(&self) {
        if !self.deregistered.swap(true, Ordering::AcqRel) {
            self.transport.unregister_response_callback(&self.exchange_id);
        }
    }
}

impl Drop for ExchangeHandle {
    fn drop(&mut self) {
        self.deregister();
    }
}

/// Broadcasts typed requests and collects their replies
pub struct ExchangeCoordinator {
    transport: Arc<dyn ITransport>,
}

impl ExchangeCoordinator {
    pub fn new(transport: Arc<dyn ITransport>) -> Self {
        Self { transport }
    }

    /// Start an exchange: register its collector, dispatch the request to
    /// every target and return the handle to wait on.
    ///
    /// A send failure toward one target is logged and absorbed; that
    /// target simply never replies and the phase runs into its bound.
    pub async fn start(
        &self,
        request: Message,
        targets: &[PeerAddress],
        expected: MessageKind,
    ) -> ExchangeHandle {
        let exchange_id = request.header().exchange_id;
        let (done_tx, done_rx) = oneshot::channel();

        let collector = Arc::new(ResponseCollector::new(
            exchange_id,
            expected,
            targets.len(),
            done_tx,
        ));

        // an exchange with no targets is complete before it starts
        if targets.is_empty() {
            collector.completed.store(true, Ordering::Release);
        }

        self.transport
            .register_response_callback(exchange_id, collector.clone());

        debug!(
            exchange_id = %exchange_id,
            kind = %request.kind(),
            targets = targets.len(),
            "dispatching exchange"
        );

        for target in targets {
            let addressed = request.clone().with_receiver(target.clone());
            if let Err(err) = self.transport.send_direct(target, addressed).await {
                warn!(
                    exchange_id = %exchange_id,
                    peer = %target,
                    error = %err,
                    "failed to dispatch request to target"
                );
            }
        }

        ExchangeHandle {
            exchange_id,
            transport: self.transport.clone(),
            collector,
            done_rx: Some(done_rx),
            deregistered: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use dashmap::DashMap;
    use peerdrive_core::domain::{ClientDevice, DeviceId, StatusCode};

    use super::*;
    use crate::message::{MessageHeader, OfferResponse, PushResponse};

    /// Transport stub that records sends and exposes the registry
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(PeerAddress, Message)>>,
        callbacks: DashMap<ExchangeId, Arc<dyn IResponseCallback>>,
    }

    #[async_trait]
    impl ITransport for RecordingTransport {
        async fn send_direct(
            &self,
            address: &PeerAddress,
            message: Message,
        ) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((address.clone(), message));
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

    fn device(name: &str, port: u16) -> ClientDevice {
        ClientDevice::new(name, DeviceId::new(), PeerAddress::new(name, port))
    }

    fn offer_response(exchange_id: ExchangeId, from: &ClientDevice) -> Message {
        Message::OfferResponse(OfferResponse {
            header: MessageHeader::new(
                exchange_id,
                StatusCode::Accepted,
                from.clone(),
                PeerAddress::new("initiator", 1),
            ),
            path: "a.txt".into(),
        })
    }

    fn offer_request(exchange_id: ExchangeId) -> Message {
        Message::OfferRequest(crate::message::OfferRequest {
            header: MessageHeader::new(
                exchange_id,
                StatusCode::Accepted,
                device("initiator", 1),
                PeerAddress::new("unset", 0),
            ),
            event_kind: peerdrive_core::domain::EventKind::Modify,
            path: "a.txt".into(),
            new_path: None,
            is_file: true,
            baseline: None,
        })
    }

    #[tokio::test]
    async fn test_completes_when_all_targets_reply() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = ExchangeCoordinator::new(transport.clone());
        let exchange_id = ExchangeId::new();

        let targets = vec![PeerAddress::new("b", 2), PeerAddress::new("c", 3)];
        let mut handle = coordinator
            .start(offer_request(exchange_id), &targets, MessageKind::OfferResponse)
            .await;

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert!(!handle.is_completed());

        let callback = transport
            .callbacks
            .get(&exchange_id)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap();
        callback
            .on_response(offer_response(exchange_id, &device("b", 2)))
            .await;
        assert!(!handle.is_completed());
        callback
            .on_response(offer_response(exchange_id, &device("c", 3)))
            .await;

        assert!(handle.await_completion(Duration::from_secs(1)).await);
        assert_eq!(handle.responses().len(), 2);
    }

    #[tokio::test]
    async fn test_times_out_without_replies() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = ExchangeCoordinator::new(transport.clone());
        let exchange_id = ExchangeId::new();

        let targets = vec![PeerAddress::new("b", 2)];
        let mut handle = coordinator
            .start(offer_request(exchange_id), &targets, MessageKind::OfferResponse)
            .await;

        assert!(!handle.await_completion(Duration::from_millis(20)).await);
        // callback must be gone after the wait, completed or not
        assert!(transport.callbacks.get(&exchange_id).is_none());
    }

    #[tokio::test]
    async fn test_wrong_kind_response_does_not_count() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = ExchangeCoordinator::new(transport.clone());
        let exchange_id = ExchangeId::new();

        let targets = vec![PeerAddress::new("b", 2)];
        let mut handle = coordinator
            .start(offer_request(exchange_id), &targets, MessageKind::OfferResponse)
            .await;

        let callback = transport
            .callbacks
            .get(&exchange_id)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap();
        callback
            .on_response(Message::PushResponse(PushResponse {
                header: MessageHeader::new(
                    exchange_id,
                    StatusCode::Accepted,
                    device("b", 2),
                    PeerAddress::new("initiator", 1),
                ),
                path: "a.txt".into(),
                requesting_chunk: 1,
            }))
            .await;

        assert!(!handle.await_completion(Duration::from_millis(20)).await);
        assert!(handle.responses().is_empty());
    }

    #[tokio::test]
    async fn test_no_targets_is_complete_immediately() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = ExchangeCoordinator::new(transport.clone());

        let mut handle = coordinator
            .start(offer_request(ExchangeId::new()), &[], MessageKind::OfferResponse)
            .await;

        assert!(handle.await_completion(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_drop_deregisters_callback() {
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = ExchangeCoordinator::new(transport.clone());
        let exchange_id = ExchangeId::new();

        let handle = coordinator
            .start(
                offer_request(exchange_id),
                &[PeerAddress::new("b", 2)],
                MessageKind::OfferResponse,
            )
            .await;

        drop(handle);
        assert!(transport.callbacks.get(&exchange_id).is_none());
    }
}
