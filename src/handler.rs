//! Application callback surface.
//!
//! An application plugs into [`crate::server::HttpWsServer`] by
//! implementing [`HttpWsHandler`]. Plain HTTP requests are answered by
//! [`HttpWsHandler::on_get_request`]; WebSocket connections report their
//! lifecycle and messages through the `on_ws_*` callbacks.
//!
//! Callbacks for one connection run sequentially on that connection's task:
//! `on_ws_open` first, then messages in arrival order, then `on_ws_close`
//! exactly once. Callbacks for different connections run concurrently.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::domain::{CloseInfo, Connection};
use crate::error::ServerError;
use crate::http::GetRequestResult;

/// Callbacks invoked by the server.
///
/// Only [`HttpWsHandler::on_get_request`] is required; the other callbacks
/// default to doing nothing (errors are logged).
#[async_trait]
pub trait HttpWsHandler: Send + Sync + 'static {
    /// The listener is bound and about to accept connections.
    async fn on_server_start(&self, _local_addr: SocketAddr) {}

    /// An error occurred. `connection` is set when the error belongs to a
    /// WebSocket connection; it is `None` for listener and HTTP errors.
    async fn on_server_error(&self, connection: Option<&Connection>, error: &ServerError) {
        match connection {
            Some(conn) => tracing::warn!(conn_id = %conn.id(), error = %error, "connection error"),
            None => tracing::error!(error = %error, "server error"),
        }
    }

    /// A WebSocket handshake completed.
    async fn on_ws_open(&self, _connection: &Connection) {}

    /// A WebSocket connection finished. The connection is already
    /// [`crate::domain::ConnectionState::Closed`].
    async fn on_ws_close(&self, _connection: &Connection, _close: &CloseInfo) {}

    /// A text message arrived.
    async fn on_ws_text(&self, _connection: &Connection, _message: String) {}

    /// A binary message arrived.
    async fn on_ws_binary(&self, _connection: &Connection, _message: Bytes) {}

    /// Answers a plain HTTP `GET` for `path` (request target, including the
    /// query string when present).
    ///
    /// # Errors
    ///
    /// A returned [`ServerError`] is reported to
    /// [`HttpWsHandler::on_server_error`] and sent to the client as a JSON
    /// error response with the error's status code.
    async fn on_get_request(&self, path: &str) -> Result<GetRequestResult, ServerError>;
}
