//! Handle to a live WebSocket connection.
//!
//! A [`Connection`] is cheap to clone: every clone shares the same state
//! and outbound queue. The socket itself is owned by the connection task in
//! [`crate::ws::connection`]; handles only enqueue [`Outbound`] frames.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::ConnectionId;
use crate::error::ServerError;
use crate::ws::message::{Outbound, close_code};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake completed; frames flow both ways.
    Open,
    /// A local close was requested; the close frame is queued.
    Closing,
    /// The socket is finished. Terminal.
    Closed,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// Close details reported to [`crate::handler::HttpWsHandler::on_ws_close`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseInfo {
    /// Close code (`1006` when the socket ended without a close frame).
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
    /// `true` when the peer initiated the close.
    pub remote: bool,
}

impl CloseInfo {
    /// Close without a close frame (connection lost, I/O error).
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::ABNORMAL,
            reason: reason.into(),
            remote: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    path: String,
    opened_at: DateTime<Utc>,
    state: AtomicU8,
    outbound: mpsc::Sender<Outbound>,
}

/// Shared handle to one WebSocket connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates an open connection handle and the receiving end of its
    /// outbound queue.
    #[must_use]
    pub fn new(
        remote_addr: Option<SocketAddr>,
        path: impl Into<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let inner = Inner {
            id: ConnectionId::new(),
            remote_addr,
            path: path.into(),
            opened_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            outbound,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Peer address, when the listener provided one.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Request target of the upgrade request (path and query).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// When the handshake completed.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the connection accepts outbound frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queues a text message.
    ///
    /// # Errors
    ///
    /// [`ServerError::ConnectionClosed`] if the connection is not open,
    /// [`ServerError::SendQueueFull`] if the outbound queue is full.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ServerError> {
        self.enqueue(Outbound::Text(text.into()))
    }

    /// Queues a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send_text`].
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), ServerError> {
        self.enqueue(Outbound::Binary(data.into()))
    }

    /// Queues a ping frame.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send_text`].
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<(), ServerError> {
        self.enqueue(Outbound::Ping(payload.into()))
    }

    /// Starts the closing handshake with the given code and reason.
    ///
    /// The connection moves to [`ConnectionState::Closing`]; later sends
    /// fail. Closing an already closing or closed connection is a no-op.
    ///
    /// # Errors
    ///
    /// [`ServerError::SendQueueFull`] if the close frame could not be
    /// queued. The connection stays `Closing` and the writer drops it once
    /// the queue drains.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), ServerError> {
        if !self.begin_closing() {
            return Ok(());
        }
        self.push(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Closes with `1000 Normal Closure`.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::close`].
    pub fn close_normal(&self) -> Result<(), ServerError> {
        self.close(close_code::NORMAL, "")
    }

    /// Moves `Open` to `Closing` without queueing a frame. Returns `false`
    /// if the connection was not open.
    pub(crate) fn begin_closing(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                ConnectionState::Open.as_u8(),
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.inner
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), ServerError> {
        if !self.is_open() {
            return Err(ServerError::ConnectionClosed(self.id()));
        }
        self.push(frame)
    }

    fn push(&self, frame: Outbound) -> Result<(), ServerError> {
        self.inner.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ServerError::SendQueueFull(self.id()),
            mpsc::error::TrySendError::Closed(_) => ServerError::ConnectionClosed(self.id()),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_open() {
        let (conn, _rx) = Connection::new(None, "/chat", 4);
        assert!(conn.is_open());
        assert_eq!(conn.path(), "/chat");
    }

    #[tokio::test]
    async fn send_text_reaches_queue() {
        let (conn, mut rx) = Connection::new(None, "/", 4);
        assert!(conn.send_text("hello").is_ok());
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected text frame");
        };
        assert_eq!(text, "hello");
    }

    #[test]
    fn full_queue_is_reported() {
        let (conn, _rx) = Connection::new(None, "/", 1);
        assert!(conn.send_binary(vec![1u8]).is_ok());
        let Err(ServerError::SendQueueFull(id)) = conn.send_binary(vec![2u8]) else {
            panic!("expected SendQueueFull");
        };
        assert_eq!(id, conn.id());
    }

    #[test]
    fn send_after_close_fails() {
        let (conn, _rx) = Connection::new(None, "/", 4);
        assert!(conn.close_normal().is_ok());
        assert_eq!(conn.state(), ConnectionState::Closing);
        let Err(ServerError::ConnectionClosed(_)) = conn.send_text("late") else {
            panic!("expected ConnectionClosed");
        };
    }

    #[tokio::test]
    async fn close_is_queued_once() {
        let (conn, mut rx) = Connection::new(None, "/", 4);
        assert!(conn.close(close_code::GOING_AWAY, "bye").is_ok());
        assert!(conn.close(close_code::NORMAL, "again").is_ok());
        drop(conn);
        let Some(Outbound::Close { code, reason }) = rx.recv().await else {
            panic!("expected close frame");
        };
        assert_eq!(code, close_code::GOING_AWAY);
        assert_eq!(reason, "bye");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn begin_closing_queues_nothing() {
        let (conn, mut rx) = Connection::new(None, "/", 4);
        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.close_normal().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mark_closed_is_terminal() {
        let (conn, _rx) = Connection::new(None, "/", 4);
        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.close_normal().is_ok());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = Connection::new(None, "/", 4);
        drop(rx);
        let Err(ServerError::ConnectionClosed(_)) = conn.send_text("x") else {
            panic!("expected ConnectionClosed");
        };
    }
}
