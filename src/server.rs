//! Server lifecycle: start, start outcome, shutdown and connection-wide
//! operations.
//!
//! [`HttpWsServer`] owns the listener task. The listener binds the
//! configured address, reports the outcome through a `watch` channel and
//! serves the [`crate::http::build_router`] router until shutdown is
//! signalled.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::serve::ListenerExt;
use chrono::Utc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::domain::{Connection, ConnectionRegistry, EventBus, ServerEvent};
use crate::error::ServerError;
use crate::handler::HttpWsHandler;
use crate::http::build_router;

/// Pending connections queued by the kernel before `accept`.
const LISTEN_BACKLOG: u32 = 1024;

/// Outcome of [`HttpWsServer::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    /// The listener has not reported yet.
    Pending,
    /// The listener is bound to the given address.
    Started(SocketAddr),
    /// The listener could not bind.
    Failed,
}

/// Single-port HTTP and WebSocket server.
///
/// # Lifecycle
///
/// `new` → [`start`](Self::start) → [`was_started`](Self::was_started) →
/// [`stop`](Self::stop). A server cannot be restarted after it was started
/// once.
pub struct HttpWsServer {
    config: Arc<ServerConfig>,
    handler: Arc<dyn HttpWsHandler>,
    registry: Arc<ConnectionRegistry>,
    event_bus: EventBus,
    start_state: watch::Sender<StartState>,
    shutdown: watch::Sender<bool>,
    start_requested: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpWsServer {
    /// Creates a server with its own connection registry.
    #[must_use]
    pub fn new(config: ServerConfig, handler: impl HttpWsHandler) -> Self {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()), handler)
    }

    /// Creates a server tracking connections in `registry`.
    ///
    /// Lets the handler hold the same registry, e.g. to broadcast from a
    /// message callback.
    #[must_use]
    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        handler: impl HttpWsHandler,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let (start_state, _) = watch::channel(StartState::Pending);
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            registry,
            event_bus,
            start_state,
            shutdown,
            start_requested: AtomicBool::new(false),
            listener_task: Mutex::new(None),
        }
    }

    /// Starts the listener on the current tokio runtime and returns
    /// immediately. Use [`was_started`](Self::was_started) to learn whether
    /// the bind succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] on a second call.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.start_requested.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }

        let state = AppState {
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            event_bus: self.event_bus.clone(),
            config: Arc::clone(&self.config),
            shutdown: self.shutdown.subscribe(),
        };
        let task = tokio::spawn(run_listener(state, self.start_state.clone()));

        let mut slot = self
            .listener_task
            .lock()
            .map_err(|_| ServerError::Internal("listener handle lock poisoned".to_string()))?;
        *slot = Some(task);
        Ok(())
    }

    /// Waits until the outcome of [`start`](Self::start) is known and
    /// returns `true` if the listener is bound.
    pub async fn was_started(&self) -> bool {
        let mut state = self.start_state.subscribe();
        let outcome = state
            .wait_for(|s| *s != StartState::Pending)
            .await
            .map(|s| *s);
        matches!(outcome, Ok(StartState::Started(_)))
    }

    /// Current start outcome without waiting.
    #[must_use]
    pub fn start_state(&self) -> StartState {
        *self.start_state.borrow()
    }

    /// Bound local address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.start_state() {
            StartState::Started(addr) => Some(addr),
            StartState::Pending | StartState::Failed => None,
        }
    }

    /// Registry of live WebSocket connections.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_bus.subscribe()
    }

    /// Applies `action` to every open connection and returns how many were
    /// visited.
    pub async fn for_each_opened_connection<F>(&self, action: F) -> usize
    where
        F: FnMut(&Connection),
    {
        self.registry.for_each_open(action).await
    }

    /// Queues `text` on every open connection. Returns how many accepted it.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let mut delivered = 0;
        self.registry
            .for_each_open(|conn| match conn.send_text(text) {
                Ok(()) => delivered += 1,
                Err(err) => tracing::debug!(conn_id = %conn.id(), error = %err, "broadcast skipped"),
            })
            .await;
        delivered
    }

    /// Queues `data` on every open connection. Returns how many accepted it.
    pub async fn broadcast_binary(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let mut delivered = 0;
        self.registry
            .for_each_open(|conn| match conn.send_binary(data.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => tracing::debug!(conn_id = %conn.id(), error = %err, "broadcast skipped"),
            })
            .await;
        delivered
    }

    /// Stops the server and waits for every connection and the listener to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the listener handle is
    /// unavailable.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.shutdown_within(None).await
    }

    /// Stops the server, waiting at most `timeout` for connections and the
    /// listener to finish. The listener is aborted when time runs out.
    ///
    /// # Errors
    ///
    /// Same as [`stop`](Self::stop).
    pub async fn stop_with_timeout(&self, timeout: Duration) -> Result<(), ServerError> {
        self.shutdown_within(Some(timeout)).await
    }

    async fn shutdown_within(&self, timeout: Option<Duration>) -> Result<(), ServerError> {
        if !self.start_requested.load(Ordering::Acquire) {
            return Ok(());
        }
        tracing::info!("stopping server");
        self.shutdown.send_replace(true);

        let mut task = self
            .listener_task
            .lock()
            .map_err(|_| ServerError::Internal("listener handle lock poisoned".to_string()))?
            .take();

        // Once the listener has drained, every accepted handshake is counted
        // in the registry, so the registry wait covers it.
        let drained = async {
            if let Some(task) = task.as_mut()
                && let Err(err) = task.await
            {
                tracing::warn!(error = %err, "listener task failed");
            }
            self.registry.wait_until_empty().await;
        };
        let completed = match timeout {
            Some(limit) => tokio::time::timeout(limit, drained).await.is_ok(),
            None => {
                drained.await;
                true
            }
        };

        if !completed {
            let remaining = self.registry.len().await;
            let pending = self.registry.pending_upgrades();
            tracing::warn!(remaining, pending, "shutdown timed out, aborting listener");
            if let Some(task) = task {
                task.abort();
            }
        }

        self.event_bus.publish(ServerEvent::Stopped {
            timestamp: Utc::now(),
        });
        tracing::info!("server stopped");
        Ok(())
    }
}

impl Drop for HttpWsServer {
    fn drop(&mut self) {
        // Let the listener and connections wind down on their own.
        self.shutdown.send_replace(true);
    }
}

impl fmt::Debug for HttpWsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWsServer")
            .field("config", &self.config)
            .field("start_state", &self.start_state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Binds the listener, reports the outcome, then serves until shutdown.
async fn run_listener(state: AppState, start_state: watch::Sender<StartState>) {
    let (listener, local_addr) = match bind(&state.config) {
        Ok(bound) => bound,
        Err(err) => {
            tracing::error!(addr = %state.config.listen_addr, error = %err, "failed to start server");
            state.handler.on_server_error(None, &err).await;
            state.event_bus.publish(ServerEvent::StartFailed {
                reason: err.to_string(),
                timestamp: Utc::now(),
            });
            start_state.send_replace(StartState::Failed);
            return;
        }
    };

    state.handler.on_server_start(local_addr).await;
    start_state.send_replace(StartState::Started(local_addr));
    state.event_bus.publish(ServerEvent::Started {
        local_addr,
        timestamp: Utc::now(),
    });
    tracing::info!(addr = %local_addr, "server listening");

    let tcp_nodelay = state.config.tcp_nodelay;
    let listener = listener.tap_io(move |tcp| {
        if tcp_nodelay && let Err(err) = tcp.set_nodelay(true) {
            tracing::trace!(error = %err, "failed to set TCP_NODELAY");
        }
    });

    let mut shutdown = state.shutdown.clone();
    let handler = Arc::clone(&state.handler);
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        })
        .await;
    if let Err(err) = served {
        let err = ServerError::Internal(format!("listener failed: {err}"));
        tracing::error!(error = %err, "server error");
        handler.on_server_error(None, &err).await;
    }
}

fn bind(config: &ServerConfig) -> Result<(TcpListener, SocketAddr), ServerError> {
    let addr = config.listen_addr;
    let bind_error = |source: std::io::Error| ServerError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(config.reuse_addr).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    Ok((listener, local_addr))
}
