//! Shared state injected into the request dispatcher and connection tasks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::domain::{ConnectionRegistry, EventBus};
use crate::handler::HttpWsHandler;

/// Shared state available to the dispatcher via Axum's `State` extractor
/// and handed to every WebSocket connection task.
#[derive(Clone)]
pub struct AppState {
    /// Application callbacks.
    pub handler: Arc<dyn HttpWsHandler>,
    /// Live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Lifecycle event bus.
    pub event_bus: EventBus,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Flips to `true` when the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("event_bus", &self.event_bus)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
