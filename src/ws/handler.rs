//! WebSocket upgrade acceptance.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::request::Parts;
use axum::response::Response;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::http::request_target;

/// Completes a validated handshake and hands the socket to a connection
/// task. Returns the `101 Switching Protocols` response.
///
/// The upgrade is counted in the registry before the response leaves, so
/// shutdown waits for it even if the connection task has not started yet.
pub fn accept(upgrade: WebSocketUpgrade, parts: &Parts, state: AppState) -> Response {
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let path = request_target(&parts.uri);
    let upgrade_guard = state.registry.begin_upgrade();

    upgrade
        .max_message_size(state.config.max_message_size)
        .max_frame_size(state.config.max_frame_size)
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            run_connection(socket, remote_addr, path, state).await;
            drop(upgrade_guard);
        })
}
