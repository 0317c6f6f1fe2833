//! Lifecycle events published by the server.
//!
//! Every lifecycle transition emits a [`ServerEvent`] through the
//! [`super::EventBus`]. Observers (logging, tests, embedding applications)
//! subscribe with [`crate::server::HttpWsServer::subscribe_events`].

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ConnectionId;

/// Event emitted on every server or connection lifecycle change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The listener is bound and accepting.
    Started {
        /// Bound local address.
        local_addr: SocketAddr,
        /// Start timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The listener could not be started.
    StartFailed {
        /// Failure description.
        reason: String,
        /// Failure timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A WebSocket handshake completed.
    ConnectionOpened {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Peer address, when known.
        remote_addr: Option<SocketAddr>,
        /// Request target of the upgrade request.
        path: String,
        /// Open timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A WebSocket connection finished.
    ConnectionClosed {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// `true` when the peer initiated the close.
        remote: bool,
        /// Close timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A plain HTTP request was answered.
    HttpRequestServed {
        /// Request target.
        path: String,
        /// Response status code.
        status: u16,
        /// Response timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The server finished shutting down.
    Stopped {
        /// Stop timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Returns the connection this event refers to, if any.
    #[must_use]
    pub const fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Self::ConnectionOpened { connection_id, .. }
            | Self::ConnectionClosed { connection_id, .. } => Some(*connection_id),
            _ => None,
        }
    }

    /// Returns the event timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Started { timestamp, .. }
            | Self::StartFailed { timestamp, .. }
            | Self::ConnectionOpened { timestamp, .. }
            | Self::ConnectionClosed { timestamp, .. }
            | Self::HttpRequestServed { timestamp, .. }
            | Self::Stopped { timestamp } => *timestamp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_type_tag() {
        let event = ServerEvent::HttpRequestServed {
            path: "/index.html".to_string(),
            status: 200,
            timestamp: Utc::now(),
        };
        let Ok(value) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(value["event_type"], "http_request_served");
        assert_eq!(value["status"], 200);
    }

    #[test]
    fn connection_id_only_for_connection_events() {
        let id = ConnectionId::new();
        let opened = ServerEvent::ConnectionOpened {
            connection_id: id,
            remote_addr: None,
            path: "/".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(opened.connection_id(), Some(id));
        let stopped = ServerEvent::Stopped {
            timestamp: Utc::now(),
        };
        assert_eq!(stopped.connection_id(), None);
    }
}
