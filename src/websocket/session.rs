//! Session loop and reconnect supervisor
//!
//! One [`Supervisor`] task owns the session for its whole life. It opens a
//! connection, runs one epoch on it (reading, keep-alive, command handling)
//! while a writer task owns the outbound half, and on loss backs off and
//! reconnects, replaying the registry snapshot before anything else is sent.
//!
//! Session state is written only from here. Callers talk to the loop through
//! the command channel; the registry is the only structure both sides touch.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::SessionConfig;
use super::dispatch::{Delivery, DispatchQueue, ErrorCallback};
use super::message::{classify, InboundFrame, TEXT_PING, TEXT_PONG};
use super::registry::SubscriptionRegistry;
use super::subscription::{SubscriptionKey, SubscriptionOp, SubscriptionRequest};
use super::transport::{Connection, Connector, FrameSink, TransportError, WsMessage};
use super::waiters::PendingWaits;
use crate::error::Error;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// First connection attempt in progress
    Connecting,
    /// Connected and every desired subscription has been sent and settled
    Connected,
    /// Connection lost; backing off, reconnecting or replaying subscriptions
    Reconnecting,
    /// Session has ended and cannot be restarted
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Reconnecting => write!(f, "Reconnecting"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Registry mutations forwarded from the facade to the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Subscribe(SubscriptionKey),
    Unsubscribe(SubscriptionKey),
}

/// State shared between the facade and the supervisor
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) waits: Arc<PendingWaits>,
    pub(crate) queue: Arc<DispatchQueue>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) reconnect_attempts: AtomicU32,
    pub(crate) close_requested: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new(dispatch_capacity: usize) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            registry: SubscriptionRegistry::new(),
            waits: Arc::new(PendingWaits::new()),
            queue: Arc::new(DispatchQueue::new(dispatch_capacity)),
            state,
            reconnect_attempts: AtomicU32::new(0),
            close_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!(%state, "Session state changed");
        }
    }
}

/// Why an epoch ended
#[derive(Debug)]
enum EpochEnd {
    /// Session cancelled or the facade went away
    Shutdown,
    /// Connection lost; reconnect if the policy allows
    Lost(TransportError),
}

/// Per-connection bookkeeping
struct Epoch {
    outbound: mpsc::UnboundedSender<WsMessage>,
    /// Keys with a live subscribe on this connection, mapped to the id of
    /// the most recent subscribe request
    subscribed: HashMap<SubscriptionKey, String>,
    /// Outstanding requests by id
    inflight: HashMap<String, (SubscriptionOp, SubscriptionKey)>,
    /// Replayed keys not yet acknowledged or rejected
    replaying: HashSet<SubscriptionKey>,
}

impl Epoch {
    fn new(outbound: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            outbound,
            subscribed: HashMap::new(),
            inflight: HashMap::new(),
            replaying: HashSet::new(),
        }
    }

    fn send(&self, msg: WsMessage) {
        // A closed channel means the writer failed; that is reported through
        // its own failure signal
        let _ = self.outbound.send(msg);
    }

    /// Whether `id` is the latest subscribe request for `key`
    fn is_latest(&self, key: &SubscriptionKey, id: Option<&str>) -> bool {
        match (self.subscribed.get(key), id) {
            (Some(latest), Some(id)) => latest == id,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// How the supervisor stopped
enum Exit {
    Shutdown,
    Exhausted(u32),
}

/// Owns the connection lifecycle for one session
pub(crate) struct Supervisor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedReceiver<Command>,
    on_error: ErrorCallback,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_request_id: u64,
}

impl Supervisor {
    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<SessionShared>,
        commands: mpsc::UnboundedReceiver<Command>,
        on_error: ErrorCallback,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            config,
            connector,
            shared,
            commands,
            on_error,
            cancel,
            tracker,
            next_request_id: 0,
        }
    }

    /// Connect, run epochs and reconnect until cancelled or out of retries
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut phase = SessionState::Connecting;

        let exit = loop {
            self.shared.set_state(phase);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Shutdown,
                result = self.connector.connect(&self.config.url) => result,
            };

            match connected {
                Ok(connection) => {
                    tracing::info!(url = %self.config.url, "WebSocket connected");
                    let started = Instant::now();
                    match self.run_epoch(connection, phase).await {
                        EpochEnd::Shutdown => break Exit::Shutdown,
                        EpochEnd::Lost(err) => {
                            if started.elapsed() >= self.config.ping_interval {
                                attempt = 0;
                            }
                            tracing::warn!(
                                error = %err,
                                graceful = err.is_graceful(),
                                "WebSocket connection lost"
                            );
                            (self.on_error)(Error::Transport(err));
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, "WebSocket connection attempt failed");
                    (self.on_error)(Error::Transport(err));
                }
            }

            phase = SessionState::Reconnecting;
            self.shared.set_state(phase);

            if !self.config.reconnect.should_attempt(attempt) {
                break Exit::Exhausted(attempt);
            }
            let delay = self.config.reconnect.delay_for_attempt(attempt);
            attempt += 1;
            self.shared
                .reconnect_attempts
                .store(attempt, Ordering::Relaxed);
            tracing::debug!(?delay, attempt, "Reconnecting after backoff");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Shutdown,
                _ = sleep(delay) => {}
            }
        };

        self.shutdown(exit).await;
    }

    async fn shutdown(self, exit: Exit) {
        self.shared.set_state(SessionState::Closed);
        // Stops the dispatcher and any waiters when we exit on our own
        self.cancel.cancel();

        match exit {
            Exit::Exhausted(attempts) => {
                let failed = self
                    .shared
                    .waits
                    .fail_all(|| Error::RetriesExhausted { attempts });
                tracing::error!(attempts, failed, "Reconnect budget exhausted, session closed");
                (self.on_error)(Error::RetriesExhausted { attempts });
            }
            Exit::Shutdown => {
                let failed = self.shared.waits.fail_all(|| Error::Cancelled);
                if self.shared.close_requested.load(Ordering::Acquire) {
                    tracing::info!(failed, "Session closed");
                    (self.on_error)(Error::SessionClosed);
                } else {
                    tracing::info!(failed, "Session cancelled");
                }
            }
        }

        let remaining = self.shared.registry.len().await;
        self.shared.registry.clear().await;
        tracing::debug!(remaining, "Subscription registry cleared");
    }

    async fn run_epoch(&mut self, connection: Connection, phase: SessionState) -> EpochEnd {
        let Connection { sink, mut stream } = connection;

        let writer_cancel = self.cancel.child_token();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (failed_tx, mut failed_rx) = oneshot::channel();
        self.tracker.spawn(write_loop(
            sink,
            outbound_rx,
            failed_tx,
            writer_cancel.clone(),
            self.config.close_timeout,
        ));

        let mut epoch = Epoch::new(outbound_tx);

        // Replay the desired set before any queued command is looked at
        self.shared.registry.reset_acknowledgements().await;
        let snapshot = self.shared.registry.snapshot().await;
        for key in snapshot {
            epoch.replaying.insert(key.clone());
            self.send_request(&mut epoch, SubscriptionOp::Subscribe, key);
        }

        let mut replay_deadline = if epoch.replaying.is_empty() {
            self.shared.set_state(SessionState::Connected);
            None
        } else {
            tracing::info!(
                count = epoch.replaying.len(),
                %phase,
                "Replaying subscriptions"
            );
            Some(Instant::now() + self.config.resubscribe_timeout)
        };

        let mut last_frame = Instant::now();
        let mut ping_sent = false;
        let stable_at = last_frame + self.config.ping_interval;
        let mut stable = false;

        let end = loop {
            let keepalive_at = if ping_sent {
                last_frame + self.config.idle_timeout
            } else {
                last_frame + self.config.ping_interval
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break EpochEnd::Shutdown,
                failed = &mut failed_rx => {
                    break EpochEnd::Lost(failed.unwrap_or_else(|_| {
                        TransportError::Failed("writer stopped".to_string())
                    }));
                }
                received = stream.receive() => match received {
                    Ok(msg) => {
                        last_frame = Instant::now();
                        ping_sent = false;
                        self.handle_message(msg, &mut epoch).await;
                    }
                    Err(err) => break EpochEnd::Lost(err),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut epoch).await,
                    None => break EpochEnd::Shutdown,
                },
                _ = sleep_until(keepalive_at) => {
                    if ping_sent {
                        break EpochEnd::Lost(TransportError::IdleTimeout(self.config.idle_timeout));
                    }
                    tracing::trace!("Sending keep-alive ping");
                    epoch.send(WsMessage::text(TEXT_PING));
                    ping_sent = true;
                }
                _ = sleep_until(stable_at), if !stable => {
                    stable = true;
                    self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
                }
                _ = sleep_until(replay_deadline.unwrap_or(keepalive_at)), if replay_deadline.is_some() => {
                    let unconfirmed: Vec<String> =
                        epoch.replaying.iter().map(ToString::to_string).collect();
                    tracing::warn!(?unconfirmed, "Replayed subscriptions not confirmed in time");
                    epoch.replaying.clear();
                }
            }

            if replay_deadline.is_some() && epoch.replaying.is_empty() {
                replay_deadline = None;
                self.shared.set_state(SessionState::Connected);
                if !self.shared.registry.is_empty().await {
                    let active = self.shared.registry.active_count().await;
                    let desired = self.shared.registry.len().await;
                    tracing::info!(
                        active,
                        desired,
                        "Subscriptions settled"
                    );
                }
            }
        };

        writer_cancel.cancel();
        end
    }

    fn send_request(&mut self, epoch: &mut Epoch, op: SubscriptionOp, key: SubscriptionKey) {
        self.next_request_id += 1;
        let id = self.next_request_id.to_string();

        let request = match op {
            SubscriptionOp::Subscribe => SubscriptionRequest::subscribe(id.clone(), key.clone()),
            SubscriptionOp::Unsubscribe => {
                SubscriptionRequest::unsubscribe(id.clone(), key.clone())
            }
        };
        let text = match request.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%key, error = %e, "Failed to encode subscription request");
                (self.on_error)(e);
                return;
            }
        };

        tracing::debug!(%key, %op, id = %id, "Sending subscription request");
        epoch.send(WsMessage::Text(text));
        match op {
            SubscriptionOp::Subscribe => {
                epoch.subscribed.insert(key.clone(), id.clone());
            }
            SubscriptionOp::Unsubscribe => {
                epoch.subscribed.remove(&key);
            }
        }
        epoch.inflight.insert(id, (op, key));
    }

    async fn handle_command(&mut self, command: Command, epoch: &mut Epoch) {
        // Commands are reconciled against the registry, so a burst of
        // subscribe/unsubscribe calls collapses to the net effect
        match command {
            Command::Subscribe(key) => {
                if let Some(latest) = epoch.subscribed.get(&key) {
                    if epoch.inflight.contains_key(latest) {
                        tracing::trace!(%key, "Subscribe already in flight on this connection");
                        return;
                    }
                    // Removed and re-added before the loop saw either command:
                    // the wire never dropped the key, so the fresh entry is
                    // already confirmed
                    if self.shared.registry.mark_acknowledged(&key).await {
                        let woken = self.shared.waits.resolve(&key, || Ok(()));
                        tracing::debug!(%key, woken, "Still subscribed on this connection");
                    }
                    return;
                }
                if !self.shared.registry.contains(&key).await {
                    return;
                }
                self.send_request(epoch, SubscriptionOp::Subscribe, key);
            }
            Command::Unsubscribe(key) => {
                if !epoch.subscribed.contains_key(&key) {
                    return;
                }
                if self.shared.registry.contains(&key).await {
                    return;
                }
                epoch.replaying.remove(&key);
                self.send_request(epoch, SubscriptionOp::Unsubscribe, key);
            }
        }
    }

    async fn handle_message(&mut self, msg: WsMessage, epoch: &mut Epoch) {
        match msg {
            WsMessage::Ping(data) => {
                tracing::trace!("Received ping frame ({} bytes)", data.len());
                epoch.send(WsMessage::Pong(data));
            }
            WsMessage::Pong(data) => {
                tracing::trace!("Received pong frame ({} bytes)", data.len());
            }
            WsMessage::Text(text) => self.handle_frame(text.into_bytes(), epoch).await,
            WsMessage::Binary(data) => self.handle_frame(data, epoch).await,
        }
    }

    async fn handle_frame(&mut self, payload: Vec<u8>, epoch: &mut Epoch) {
        match classify(&payload) {
            InboundFrame::Ping => {
                tracing::trace!("Received text ping");
                epoch.send(WsMessage::text(TEXT_PONG));
            }
            InboundFrame::Pong => tracing::trace!("Received text pong"),
            InboundFrame::Ack { op, id, key } => self.handle_ack(op, id, key, epoch).await,
            InboundFrame::Error { id, code, msg } => {
                self.handle_error(id, code, msg, epoch).await;
            }
            InboundFrame::Control(kind) => {
                tracing::trace!(?kind, "Received control frame");
                self.shared.queue.push(Delivery::Control(kind, payload));
            }
            InboundFrame::Data => {
                self.shared.queue.push(Delivery::Data(payload));
            }
        }
    }

    async fn handle_ack(
        &mut self,
        op: SubscriptionOp,
        id: Option<String>,
        key: Option<SubscriptionKey>,
        epoch: &mut Epoch,
    ) {
        let request = id.as_ref().and_then(|id| epoch.inflight.remove(id));
        let key = match (request, key) {
            (Some((_, key)), _) | (None, Some(key)) => key,
            (None, None) => {
                tracing::debug!(?id, %op, "Ack without a known id or argument");
                return;
            }
        };

        match op {
            SubscriptionOp::Subscribe => {
                if !epoch.is_latest(&key, id.as_deref()) {
                    tracing::debug!(%key, ?id, "Discarding ack for superseded request");
                    return;
                }
                epoch.replaying.remove(&key);
                if self.shared.registry.mark_acknowledged(&key).await {
                    let woken = self.shared.waits.resolve(&key, || Ok(()));
                    tracing::debug!(%key, woken, "Subscribed");
                } else {
                    tracing::debug!(%key, "Discarding stale ack for unsubscribed key");
                }
            }
            SubscriptionOp::Unsubscribe => tracing::debug!(%key, "Unsubscribed"),
        }
    }

    async fn handle_error(
        &mut self,
        id: Option<String>,
        code: String,
        msg: String,
        epoch: &mut Epoch,
    ) {
        let request = id.as_ref().and_then(|id| epoch.inflight.remove(id));

        match request {
            Some((SubscriptionOp::Subscribe, key)) => {
                if !epoch.is_latest(&key, id.as_deref()) {
                    tracing::debug!(%key, ?id, "Discarding error for superseded request");
                    return;
                }
                epoch.subscribed.remove(&key);
                epoch.replaying.remove(&key);
                tracing::warn!(%key, %code, %msg, "Subscription rejected");

                if self
                    .shared
                    .registry
                    .mark_failed(&key, format!("{code}: {msg}"))
                    .await
                {
                    self.shared.waits.resolve(&key, || {
                        Err(Error::Subscribe {
                            key: key.clone(),
                            code: code.clone(),
                            msg: msg.clone(),
                        })
                    });
                    (self.on_error)(Error::Subscribe { key, code, msg });
                }
            }
            Some((SubscriptionOp::Unsubscribe, key)) => {
                tracing::warn!(%key, %code, %msg, "Unsubscribe rejected");
                (self.on_error)(Error::Subscribe { key, code, msg });
            }
            None => {
                tracing::warn!(?id, %code, %msg, "Server error");
                (self.on_error)(Error::Api { code, msg });
            }
        }
    }
}

/// Owns the outbound half of one connection and writes frames in order
async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    failed: oneshot::Sender<TransportError>,
    cancel: CancellationToken,
    close_timeout: Duration,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send(msg) => sent,
        };
        if let Err(err) = sent {
            tracing::debug!(error = %err, "WebSocket write failed");
            let _ = failed.send(err);
            return;
        }
    }

    match timeout(close_timeout, sink.close()).await {
        Ok(Ok(())) => tracing::trace!("WebSocket closed"),
        Ok(Err(err)) => tracing::trace!(error = %err, "WebSocket close failed"),
        Err(_) => tracing::debug!(?close_timeout, "WebSocket close timed out"),
    }
}
