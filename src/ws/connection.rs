//! WebSocket connection state machine.
//!
//! Runs one WebSocket connection from handshake to close: registers it,
//! drains its outbound queue into the socket, dispatches inbound messages
//! to the application, keeps it alive with pings and tears it down on
//! shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::message::{Inbound, Outbound, close_code};
use crate::app_state::AppState;
use crate::domain::{CloseInfo, Connection, ConnectionState, ServerEvent};
use crate::error::ServerError;

/// Reason sent with `1001` when the server shuts down.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// How long the writer may take to flush the final frames.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Runs a single WebSocket connection until it closes.
///
/// - Registers the connection and calls `on_ws_open`.
/// - Dispatches text and binary messages to the handler.
/// - Forwards queued [`Outbound`] frames to the client.
/// - Unregisters the connection and calls `on_ws_close` exactly once.
///
/// A socket upgraded after shutdown started is closed with `1001` without
/// being registered or reported to the handler.
pub async fn run_connection(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    path: String,
    state: AppState,
) {
    let stopping = *state.shutdown.borrow();
    if stopping {
        turn_away(socket, &path).await;
        return;
    }

    let (connection, outbound_rx) =
        Connection::new(remote_addr, path, state.config.send_queue_capacity);
    let conn_id = connection.id();

    state.registry.insert(connection.clone()).await;
    state.event_bus.publish(ServerEvent::ConnectionOpened {
        connection_id: conn_id,
        remote_addr,
        path: connection.path().to_string(),
        timestamp: connection.opened_at(),
    });
    tracing::debug!(conn_id = %conn_id, path = %connection.path(), "ws connection opened");
    state.handler.on_ws_open(&connection).await;

    let (ws_tx, mut ws_rx) = socket.split();
    let (peer_closed_tx, peer_closed_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound_rx, peer_closed_rx));

    let close_info = read_loop(&connection, &mut ws_rx, &state).await;

    if close_info.remote {
        // The protocol layer has queued the echo; the writer only flushes it.
        connection.begin_closing();
        let _ = peer_closed_tx.send(());
    } else if let Err(err) = connection.close(close_info.code, "") {
        // No-op when a close frame is already queued.
        tracing::debug!(conn_id = %conn_id, error = %err, "close frame not queued");
    }
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        tracing::debug!(conn_id = %conn_id, "ws writer did not finish, aborting");
        writer.abort();
    }
    connection.mark_closed();

    state.handler.on_ws_close(&connection, &close_info).await;
    state.registry.remove(conn_id).await;
    state.event_bus.publish(ServerEvent::ConnectionClosed {
        connection_id: conn_id,
        code: close_info.code,
        reason: close_info.reason.clone(),
        remote: close_info.remote,
        timestamp: Utc::now(),
    });
    tracing::debug!(
        conn_id = %conn_id,
        code = close_info.code,
        remote = close_info.remote,
        "ws connection closed"
    );
}

/// Reads frames until the connection ends and reports how it ended.
async fn read_loop(
    connection: &Connection,
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> CloseInfo {
    let mut shutdown = state.shutdown.clone();
    let ping_interval = state.config.ping_interval;
    let mut keepalive = keepalive_timer(ping_interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(message)) => {
                        last_seen = Instant::now();
                        match Inbound::from(message) {
                            Inbound::Text(text) => state.handler.on_ws_text(connection, text).await,
                            Inbound::Binary(data) => state.handler.on_ws_binary(connection, data).await,
                            Inbound::Control => {}
                            Inbound::Close(mut info) => {
                                // The peer is answering our own close frame.
                                if connection.state() == ConnectionState::Closing {
                                    info.remote = false;
                                }
                                return info;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        let code = close_code::for_read_error(&err);
                        let err = ServerError::from(err);
                        tracing::debug!(conn_id = %connection.id(), code, error = %err, "ws read failed");
                        state.handler.on_server_error(Some(connection), &err).await;
                        return CloseInfo {
                            code,
                            reason: err.to_string(),
                            remote: false,
                        };
                    }
                    None => return CloseInfo::abnormal("connection reset"),
                }
            }
            () = shutdown_requested(&mut shutdown) => {
                if let Err(err) = connection.close(close_code::GOING_AWAY, SHUTDOWN_REASON) {
                    tracing::debug!(conn_id = %connection.id(), error = %err, "going-away frame not queued");
                }
                return CloseInfo {
                    code: close_code::GOING_AWAY,
                    reason: SHUTDOWN_REASON.to_string(),
                    remote: false,
                };
            }
            () = next_tick(&mut keepalive) => {
                if last_seen.elapsed() > ping_interval + ping_interval / 2 {
                    tracing::info!(conn_id = %connection.id(), "ws connection lost");
                    return CloseInfo::abnormal("connection lost");
                }
                if let Err(err) = connection.send_ping(Bytes::new()) {
                    tracing::debug!(conn_id = %connection.id(), error = %err, "ping not queued");
                }
            }
        }
    }
}

/// Drains the outbound queue into the socket.
///
/// Stops after sending a close frame, after a failed write, or once the
/// peer's close has been read and the queue is empty. The sink is always
/// closed on the way out, which flushes the protocol layer's close echo.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut peer_closed: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let is_close = frame.is_close();
                if let Err(err) = ws_tx.send(frame.into_message()).await {
                    tracing::debug!(error = %err, "ws write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            _ = &mut peer_closed => break,
        }
    }
    if let Err(err) = ws_tx.close().await {
        tracing::trace!(error = %err, "ws sink close failed");
    }
}

/// Closes a socket that arrived after shutdown started.
async fn turn_away(mut socket: WebSocket, path: &str) {
    tracing::debug!(path = %path, "ws connection refused during shutdown");
    let going_away = Outbound::Close {
        code: close_code::GOING_AWAY,
        reason: SHUTDOWN_REASON.to_string(),
    };
    if let Err(err) = socket.send(going_away.into_message()).await {
        tracing::trace!(error = %err, "going-away frame not sent");
    }
    if let Err(err) = SinkExt::close(&mut socket).await {
        tracing::trace!(error = %err, "ws sink close failed");
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender means the server is gone; treat it as shutdown.
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

fn keepalive_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
