//! In-memory transport for tests
//!
//! [`MockConnector`] hands every accepted connection to a [`MockServer`] as a
//! [`MockPeer`], which plays the exchange side: it reads what the client
//! wrote and pushes frames or failures back.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::subscription::{SubscriptionOp, SubscriptionRequest};
use super::transport::{Connection, Connector, FrameSink, FrameStream, TransportError, WsMessage};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn mock_transport() -> (Arc<MockConnector>, MockServer) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        accepted: accepted_tx,
        refuse: AtomicU32::new(0),
        attempts: AtomicU32::new(0),
    });
    (connector, MockServer {
        accepted: accepted_rx,
    })
}

pub(crate) struct MockConnector {
    accepted: mpsc::UnboundedSender<MockPeer>,
    refuse: AtomicU32,
    attempts: AtomicU32,
}

impl MockConnector {
    /// Refuse the next `count` connection attempts
    pub(crate) fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Total connection attempts, refused ones included
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Failed("connection refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MockPeer {
            sent: sent_rx,
            inbound: inbound_tx,
            closed: closed.clone(),
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Failed("mock server gone".to_string()))?;

        Ok(Connection {
            sink: Box::new(MockSink {
                sent: sent_tx,
                closed,
            }),
            stream: Box::new(MockStream { inbound: inbound_rx }),
        })
    }
}

pub(crate) struct MockServer {
    accepted: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    /// Wait for the client to connect
    pub(crate) async fn accept(&mut self) -> MockPeer {
        tokio::time::timeout(RECV_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Whether a connection is waiting to be accepted
    pub(crate) fn try_accept(&mut self) -> Option<MockPeer> {
        self.accepted.try_recv().ok()
    }
}

/// Server side of one mock connection
pub(crate) struct MockPeer {
    sent: mpsc::UnboundedReceiver<WsMessage>,
    inbound: mpsc::UnboundedSender<Result<WsMessage, TransportError>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Next frame written by the client, or `None` if the writer went away
    pub(crate) async fn next_frame(&mut self) -> Option<WsMessage> {
        tokio::time::timeout(RECV_TIMEOUT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
    }

    /// Next subscription request, skipping keep-alive frames
    pub(crate) async fn next_request(&mut self) -> SubscriptionRequest {
        loop {
            match self.next_frame().await {
                Some(WsMessage::Text(text)) if text == "ping" => continue,
                Some(WsMessage::Text(text)) => {
                    return serde_json::from_str(&text).expect("client sent a non-request frame")
                }
                Some(other) => panic!("unexpected frame {other:?}"),
                None => panic!("client writer closed"),
            }
        }
    }

    /// Subscription requests already written, without waiting
    pub(crate) fn drain_requests(&mut self) -> Vec<SubscriptionRequest> {
        let mut requests = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            if let WsMessage::Text(text) = frame {
                if let Ok(request) = serde_json::from_str(&text) {
                    requests.push(request);
                }
            }
        }
        requests
    }

    pub(crate) fn push(&self, msg: WsMessage) {
        let _ = self.inbound.send(Ok(msg));
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.push(WsMessage::text(text));
    }

    /// Confirm a request the way the exchange does
    pub(crate) fn ack(&self, request: &SubscriptionRequest) {
        let event = match request.op {
            SubscriptionOp::Subscribe => "subscribe",
            SubscriptionOp::Unsubscribe => "unsubscribe",
        };
        let frame = serde_json::json!({
            "id": request.id,
            "event": event,
            "arg": request.args[0],
            "connId": "mock",
        });
        self.push_text(&frame.to_string());
    }

    /// Reject a request with an error event
    pub(crate) fn reject(&self, request: &SubscriptionRequest, code: &str, msg: &str) {
        let frame = serde_json::json!({
            "id": request.id,
            "event": "error",
            "code": code,
            "msg": msg,
            "connId": "mock",
        });
        self.push_text(&frame.to_string());
    }

    /// Make the client's next receive fail
    pub(crate) fn fail(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    /// Whether the client closed its sink
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockSink {
    sent: mpsc::UnboundedSender<WsMessage>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, msg: WsMessage) -> Result<(), TransportError> {
        self.sent
            .send(msg)
            .map_err(|_| TransportError::Failed("peer went away".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<Result<WsMessage, TransportError>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn receive(&mut self) -> Result<WsMessage, TransportError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed {
                code: None,
                reason: "peer dropped".to_string(),
            }),
        }
    }
}
