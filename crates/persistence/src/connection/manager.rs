//! Connection state machine.
//!
//! ```text
//!               ping ok
//! Connecting ------------> Connected
//!     |  ^                    |
//!     |  | retry after        | timeout / no living connections
//!     |  | backoff            v
//!     |  +-------------- Reconnecting
//!     | fatal error
//!     v
//! Disconnected
//! ```
//!
//! The manager implements [`SearchTransport`] by delegating to the wrapped
//! transport and passing every completion through a single `observe` step.
//! Faults are returned to the caller unchanged; at most one connection loop
//! runs at a time.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{BackendError, ConnectionFault};
use crate::transport::{
    BulkAction, BulkResponse, DocRef, MgetItem, SearchRequest, SearchResponse, SearchTransport,
};

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Cluster reachable.
    Connected,
    /// Connection lost; a background loop is trying to restore it.
    Reconnecting,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful connection.
    Ready,
    /// Connection restored after a disconnect.
    Reconnected,
    /// Connection lost.
    Disconnect,
    /// The connection loop hit a non-retryable error and stopped.
    Error(String),
}

struct Inner {
    transport: Arc<dyn SearchTransport>,
    state: RwLock<ConnectionState>,
    /// Set while a fault is waiting for the connection loop to restore service.
    reconnecting: AtomicBool,
    /// Set while a connection loop owns the pings.
    loop_active: AtomicBool,
    has_connected: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
    retry_interval: Duration,
    hosts: String,
}

/// Owns the connection to the search cluster.
///
/// Cloning is cheap; clones share state and subscribers.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("hosts", &self.inner.hosts)
            .field("state", &*self.inner.state.read())
            .field("reconnecting", &self.is_reconnecting())
            .field("retry_interval", &self.inner.retry_interval)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Wraps `transport`, retrying failed connection attempts every `retry_interval`.
    ///
    /// `hosts` only labels log lines.
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        retry_interval: Duration,
        hosts: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                state: RwLock::new(ConnectionState::Disconnected),
                reconnecting: AtomicBool::new(false),
                loop_active: AtomicBool::new(false),
                has_connected: AtomicBool::new(false),
                events,
                retry_interval,
                hosts: hosts.into(),
            }),
        }
    }

    /// Wraps `transport` using the timing and host list from `config`.
    pub fn from_config(config: &StoreConfig, transport: Arc<dyn SearchTransport>) -> Self {
        Self::new(
            transport,
            config.reconnect_interval(),
            config.node_urls().join(", "),
        )
    }

    /// Returns true while the cluster is believed reachable.
    pub fn is_connected(&self) -> bool {
        *self.inner.state.read() == ConnectionState::Connected
    }

    /// Returns true while a reconnection is pending or running.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the wrapped transport.
    pub fn transport(&self) -> &Arc<dyn SearchTransport> {
        &self.inner.transport
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    fn emit(&self, event: ConnectionEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn try_claim_loop(&self) -> bool {
        self.inner
            .loop_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Pings until the cluster answers or a non-retryable error occurs.
    ///
    /// Emits [`ConnectionEvent::Ready`] on the first successful connection and
    /// [`ConnectionEvent::Reconnected`] on every later one. If a connection
    /// loop is already running, waits for its outcome instead of starting
    /// another.
    pub async fn connect(&self) -> Result<(), BackendError> {
        let mut events = self.subscribe();
        if !self.try_claim_loop() {
            debug!(hosts = %self.inner.hosts, "Connection loop already running, waiting");
            return self.wait_for_loop(&mut events).await;
        }
        self.run_loop().await
    }

    async fn wait_for_loop(
        &self,
        events: &mut broadcast::Receiver<ConnectionEvent>,
    ) -> Result<(), BackendError> {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Ready | ConnectionEvent::Reconnected) => return Ok(()),
                Ok(ConnectionEvent::Error(message)) => {
                    return Err(BackendError::ConnectionFailed {
                        backend_name: self.inner.hosts.clone(),
                        message,
                    });
                }
                Ok(ConnectionEvent::Disconnect) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_connected() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BackendError::Internal {
                        backend_name: self.inner.hosts.clone(),
                        message: "connection event channel closed".to_string(),
                        source: None,
                    });
                }
            }
        }
    }

    /// Runs the ping loop. The caller must hold the `loop_active` claim.
    async fn run_loop(&self) -> Result<(), BackendError> {
        let recovering = self.inner.has_connected.load(Ordering::SeqCst);
        self.set_state(if recovering {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        loop {
            match self.inner.transport.ping().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    info!(hosts = %self.inner.hosts, "Connected to search cluster");

                    let first = !self.inner.has_connected.swap(true, Ordering::SeqCst);
                    // released before emitting so waiters subscribed during the loop see the event
                    self.inner.loop_active.store(false, Ordering::SeqCst);
                    self.inner.reconnecting.store(false, Ordering::SeqCst);
                    self.emit(if first {
                        ConnectionEvent::Ready
                    } else {
                        ConnectionEvent::Reconnected
                    });
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        hosts = %self.inner.hosts,
                        error = %e,
                        retry_in_ms = self.inner.retry_interval.as_millis() as u64,
                        "Failed connecting to search cluster, retrying"
                    );
                    tokio::time::sleep(self.inner.retry_interval).await;
                }
                Err(e) => {
                    error!(
                        hosts = %self.inner.hosts,
                        error = %e,
                        "Connection to search cluster failed"
                    );
                    self.set_state(ConnectionState::Disconnected);
                    self.inner.loop_active.store(false, Ordering::SeqCst);
                    self.inner.reconnecting.store(false, Ordering::SeqCst);
                    self.emit(ConnectionEvent::Error(e.to_string()));
                    return Err(e);
                }
            }
        }
    }

    /// Runs [`connect`](Self::connect) on a background task.
    pub fn spawn_connect(&self) -> JoinHandle<Result<(), BackendError>> {
        let manager = self.clone();
        tokio::spawn(async move { manager.connect().await })
    }

    /// Inspects a completion, starting background recovery on connectivity faults.
    fn observe<T>(&self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        if let Err(e) = &result {
            if let Some(fault) = e.fault() {
                self.on_fault(fault, e);
            }
        }
        result
    }

    fn on_fault(&self, fault: ConnectionFault, err: &BackendError) {
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(error = %err, "Reconnection already pending");
            return;
        }

        match fault {
            ConnectionFault::NoLivingConnections => {
                error!(hosts = %self.inner.hosts, error = %err, "Lost connection to search cluster")
            }
            ConnectionFault::RequestTimeout => {
                warn!(hosts = %self.inner.hosts, error = %err, "Search cluster request timed out")
            }
        }

        // a connection that never came up cannot be lost
        if self.inner.has_connected.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Reconnecting);
            self.emit(ConnectionEvent::Disconnect);
        }

        if !self.try_claim_loop() {
            debug!(hosts = %self.inner.hosts, "Connection loop already running");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "No runtime available to schedule reconnection");
                self.inner.loop_active.store(false, Ordering::SeqCst);
                self.inner.reconnecting.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        let manager = self.clone();
        let delay = self.inner.retry_interval;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = manager.run_loop().await;
        });
    }
}

#[async_trait]
impl SearchTransport for ConnectionManager {
    async fn ping(&self) -> Result<(), BackendError> {
        self.observe(self.inner.transport.ping().await)
    }

    async fn mget(&self, docs: Vec<DocRef>) -> Result<Vec<MgetItem>, BackendError> {
        self.observe(self.inner.transport.mget(docs).await)
    }

    async fn bulk(
        &self,
        actions: Vec<BulkAction>,
        refresh: bool,
    ) -> Result<BulkResponse, BackendError> {
        self.observe(self.inner.transport.bulk(actions, refresh).await)
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, BackendError> {
        self.observe(self.inner.transport.search(request).await)
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<SearchResponse, BackendError> {
        self.observe(self.inner.transport.scroll(scroll_id, keep_alive).await)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        self.observe(self.inner.transport.clear_scroll(scroll_id).await)
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, BackendError> {
        self.observe(self.inner.transport.count(index, body).await)
    }

    async fn create_index(&self, name: &str) -> Result<Value, BackendError> {
        self.observe(self.inner.transport.create_index(name).await)
    }
}
