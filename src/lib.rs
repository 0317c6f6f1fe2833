//! # http-ws-server
//!
//! Single-port HTTP and WebSocket server built on axum and tokio.
//!
//! Every request on the listener is classified by its `Upgrade` header.
//! Plain HTTP `GET` requests are answered by the application through
//! [`HttpWsHandler::on_get_request`]; WebSocket handshakes become tracked
//! [`Connection`]s whose lifecycle and messages are dispatched to the
//! `on_ws_*` callbacks.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── Listener + Router (server, http/)
//!     │     ├── plain GET ──► HttpWsHandler::on_get_request
//!     │     └── upgrade ────► WS handshake (ws/handler)
//!     │
//!     ├── Connection task (ws/connection)
//!     │     ├── reader ─────► HttpWsHandler::on_ws_*
//!     │     └── writer ◄──── per-connection send queue
//!     │
//!     ├── ConnectionRegistry (domain/)
//!     └── EventBus (domain/)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use http_ws_server::{
//!     Connection, GetRequestResult, HttpWsHandler, HttpWsServer, ServerConfig, ServerError,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl HttpWsHandler for Echo {
//!     async fn on_ws_text(&self, connection: &Connection, message: String) {
//!         let _ = connection.send_text(message);
//!     }
//!
//!     async fn on_get_request(&self, _path: &str) -> Result<GetRequestResult, ServerError> {
//!         Ok(GetRequestResult::text("echo server"))
//!     }
//! }
//!
//! # async fn run() -> Result<(), ServerError> {
//! let config = ServerConfig::new("127.0.0.1:8080".parse().map_err(|_| {
//!     ServerError::Internal("bad address".to_string())
//! })?);
//! let server = HttpWsServer::new(config, Echo);
//! server.start()?;
//! if server.was_started().await {
//!     server.stop().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;
pub mod ws;

pub use config::ServerConfig;
pub use domain::{
    CloseInfo, Connection, ConnectionId, ConnectionRegistry, ConnectionState, EventBus,
    ServerEvent,
};
pub use error::ServerError;
pub use handler::HttpWsHandler;
pub use http::GetRequestResult;
pub use server::{HttpWsServer, StartState};
