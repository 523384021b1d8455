//! Public session facade
//!
//! [`WsClient`] is what callers hold. It validates configuration, starts the
//! supervisor and dispatcher, records subscription intent in the registry
//! and forwards it to the session loop, and lets callers block until a key
//! is acknowledged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::SessionConfig;
use super::dispatch::{ControlCallback, DataCallback, Dispatcher, ErrorCallback};
use super::message::ControlKind;
use super::registry::SubscriptionEntry;
use super::session::{Command, SessionShared, SessionState, Supervisor};
use super::subscription::SubscriptionKey;
use super::transport::{Connector, TungsteniteConnector};
use crate::error::{Error, Result};
use crate::types::{Network, WsEndpoint};

/// Streaming session with automatic reconnection and subscription replay
///
/// Create it, optionally register control observers, then [`start`] it with
/// a root cancellation token and the data/error callbacks. Subscriptions may
/// be added before the first connection; they are sent as soon as one is up.
///
/// [`start`]: WsClient::start
pub struct WsClient {
    /// Session configuration
    config: SessionConfig,
    /// Opens transport connections
    connector: Arc<dyn Connector>,
    /// Registry, waits, dispatch queue and state shared with the supervisor
    shared: Arc<SessionShared>,
    /// Commands to the session loop
    commands: mpsc::UnboundedSender<Command>,
    /// Receiving end, handed to the supervisor on start
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
    /// Observers for control broadcasts, handed to the dispatcher on start
    observers: HashMap<ControlKind, ControlCallback>,
    /// Child of the caller's root token once started
    session: CancellationToken,
    /// Tracks every task the session spawns
    tracker: TaskTracker,
    started: bool,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl WsClient {
    /// Create a client that connects with `tokio-tungstenite`
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    /// Create a client for the public endpoint of a network
    pub fn public(network: Network) -> Self {
        Self::new(SessionConfig::for_endpoint(network, WsEndpoint::Public))
    }

    /// Create a client for the business endpoint of a network (candles,
    /// spread trades and other business channels)
    pub fn business(network: Network) -> Self {
        Self::new(SessionConfig::for_endpoint(network, WsEndpoint::Business))
    }

    /// Create a client over a custom transport
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let tracker = TaskTracker::new();
        // Nothing else is ever added besides what start spawns, so `done`
        // resolves as soon as those tasks finish (or at once if never started)
        tracker.close();

        Self {
            shared: Arc::new(SessionShared::new(config.dispatch_capacity)),
            config,
            connector,
            commands,
            command_rx: Some(command_rx),
            observers: HashMap::new(),
            session: CancellationToken::new(),
            tracker,
            started: false,
        }
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register an observer for one kind of control broadcast
    ///
    /// Must be called before [`start`](WsClient::start). Broadcasts of a kind
    /// with no observer are discarded.
    pub fn observe<F>(&mut self, kind: ControlKind, observer: F) -> Result<()>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        self.observers.insert(kind, Arc::new(observer));
        Ok(())
    }

    /// Start the session
    ///
    /// Returns once the background tasks are spawned; connecting happens in
    /// the background. Cancelling `ctx` tears the session down. Must be
    /// called from within a Tokio runtime.
    ///
    /// `on_data` receives every data frame in receipt order from a single
    /// task. `on_error` receives connection losses, per-key rejections and
    /// the fatal error that ends the session, if any.
    pub fn start<D, E>(&mut self, ctx: &CancellationToken, on_data: D, on_error: E) -> Result<()>
    where
        D: Fn(Vec<u8>) + Send + Sync + 'static,
        E: Fn(Error) + Send + Sync + 'static,
    {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        if self.shared.close_requested.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        self.config.validate()?;
        let command_rx = self.command_rx.take().ok_or(Error::AlreadyStarted)?;

        self.session = ctx.child_token();
        self.started = true;

        let on_data: DataCallback = Arc::new(on_data);
        let on_error: ErrorCallback = Arc::new(on_error);

        let dispatcher = Dispatcher::new(
            self.shared.queue.clone(),
            on_data,
            std::mem::take(&mut self.observers),
        );
        self.tracker.spawn(dispatcher.run(self.session.clone()));

        let supervisor = Supervisor::new(
            self.config.clone(),
            self.connector.clone(),
            self.shared.clone(),
            command_rx,
            on_error,
            self.session.clone(),
            self.tracker.clone(),
        );
        self.tracker.spawn(supervisor.run());

        tracing::info!(url = %self.config.url, "Session started");
        Ok(())
    }

    /// Add a subscription without waiting for the server
    ///
    /// Idempotent: a key that is already desired sends nothing. A key that
    /// was rejected earlier is requested again.
    pub async fn subscribe(&self, key: SubscriptionKey) -> Result<()> {
        self.ensure_open()?;
        if self.shared.registry.add(key.clone()).await {
            tracing::debug!(%key, "Subscription added");
            self.commands
                .send(Command::Subscribe(key))
                .map_err(|_| Error::SessionClosed)?;
        }
        Ok(())
    }

    /// Add a subscription and wait up to `timeout` for the server to
    /// acknowledge it
    pub async fn subscribe_and_wait(&self, key: SubscriptionKey, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.subscribe_and_wait_until(key, deadline, &CancellationToken::new())
            .await
    }

    /// Add a subscription and wait until it is acknowledged, `deadline`
    /// passes, `cancel` fires or the session ends
    ///
    /// A deadline that has already passed fails with [`Error::Timeout`]
    /// without touching the registry. Timing out or being cancelled leaves
    /// the key desired; call [`unsubscribe`](WsClient::unsubscribe) to drop
    /// it.
    pub async fn subscribe_and_wait_until(
        &self,
        key: SubscriptionKey,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(key));
        }
        self.ensure_open()?;

        // Register before subscribing so an ack cannot slip in between
        let (_guard, outcome) = self.shared.waits.register(key.clone());
        self.subscribe(key.clone()).await?;
        if self.shared.registry.is_acknowledged(&key).await {
            return Ok(());
        }

        tokio::select! {
            biased;
            outcome = outcome => outcome.unwrap_or(Err(Error::Cancelled)),
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.session.cancelled() => Err(Error::Cancelled),
            _ = sleep_until(deadline) => Err(Error::Timeout(key)),
        }
    }

    /// Remove a subscription
    ///
    /// Callers waiting on the key fail with [`Error::Unsubscribed`]. Removing
    /// a key that is not desired does nothing.
    pub async fn unsubscribe(&self, key: SubscriptionKey) -> Result<()> {
        self.ensure_open()?;
        if self.shared.registry.remove(&key).await {
            tracing::debug!(%key, "Subscription removed");
            self.shared
                .waits
                .resolve(&key, || Err(Error::Unsubscribed(key.clone())));
            self.commands
                .send(Command::Unsubscribe(key))
                .map_err(|_| Error::SessionClosed)?;
        }
        Ok(())
    }

    /// Resolves once every task spawned by the session has exited
    pub fn done(&self) -> impl Future<Output = ()> + Send + '_ {
        self.tracker.wait()
    }

    /// Close the session for good and wait for it to wind down
    ///
    /// The error callback receives [`Error::SessionClosed`] once.
    pub async fn close(&self) -> Result<()> {
        self.shared.close_requested.store(true, Ordering::Release);
        self.session.cancel();
        if !self.started {
            self.shared.set_state(SessionState::Closed);
        }
        self.done().await;
        Ok(())
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Check if currently connected with all subscriptions settled
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Desired subscriptions in the order they were added
    pub async fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.shared.registry.snapshot().await
    }

    /// Registry entry for one key
    pub async fn entry(&self, key: &SubscriptionKey) -> Option<SubscriptionEntry> {
        self.shared.registry.entry(key).await
    }

    /// Number of callers blocked in `subscribe_and_wait`
    pub fn pending_waits(&self) -> usize {
        self.shared.waits.len()
    }

    /// Consecutive reconnect attempts since the last stable connection
    ///
    /// A connection counts as stable once it has stayed up for
    /// `ping_interval`; the count drops back to zero at that point.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Frames dropped because the data callback fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.shared.queue.dropped()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.close_requested.load(Ordering::Acquire)
            || (self.started && self.session.is_cancelled())
            || self.state() == SessionState::Closed
        {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        // Only the session's child token; the caller's root is left alone
        self.session.cancel();
    }
}
