//! Frame mapping between axum's WebSocket [`Message`] and the crate's
//! inbound/outbound types.
//!
//! Frame parsing, masking and fragmentation are done by the protocol layer
//! underneath axum; this module decides what each frame means for dispatch
//! and how queued frames go back on the wire.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};

use crate::domain::CloseInfo;

/// WebSocket close codes used by the server (RFC 6455 §7.4.1).
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Message payload inconsistent with its type (e.g. invalid UTF-8).
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Close frame carried no status code. Never sent on the wire.
    pub const NO_STATUS: u16 = 1005;
    /// Connection ended without a close frame. Never sent on the wire.
    pub const ABNORMAL: u16 = 1006;
    /// Message too big.
    pub const TOO_BIG: u16 = 1009;
    /// TLS handshake failure. Never sent on the wire.
    pub const TLS: u16 = 1015;

    /// Returns `true` for codes that must not appear in a close frame.
    #[must_use]
    pub const fn is_reserved(code: u16) -> bool {
        matches!(code, NO_STATUS | ABNORMAL | TLS)
    }

    /// Close code answering a failed read.
    ///
    /// axum does not re-export the protocol layer's error type, so the
    /// error is classified by its message. I/O failures and anything
    /// unrecognised map to [`ABNORMAL`].
    #[must_use]
    pub fn for_read_error(err: &axum::Error) -> u16 {
        let message = err.to_string();
        if message.starts_with("Space limit exceeded") {
            TOO_BIG
        } else if message.starts_with("WebSocket protocol error") {
            PROTOCOL_ERROR
        } else if message.starts_with("UTF-8 encoding error") {
            INVALID_PAYLOAD
        } else {
            ABNORMAL
        }
    }
}

/// Frame queued on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with payload.
    Ping(Bytes),
    /// Close frame; the writer stops after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl Outbound {
    /// Returns `true` for the close frame.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Converts into the wire message.
    ///
    /// Reserved close codes are sent as a close frame without payload.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::text(text),
            Self::Binary(data) => Message::Binary(data),
            Self::Ping(payload) => Message::Ping(payload),
            Self::Close { code, .. } if close_code::is_reserved(code) => Message::Close(None),
            Self::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}

/// Meaning of a frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text message for [`crate::handler::HttpWsHandler::on_ws_text`].
    Text(String),
    /// Binary message for [`crate::handler::HttpWsHandler::on_ws_binary`].
    Binary(Bytes),
    /// Ping or pong; only refreshes liveness. Pings are answered by the
    /// protocol layer.
    Control,
    /// The peer sent a close frame.
    Close(CloseInfo),
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data),
            Message::Ping(_) | Message::Pong(_) => Self::Control,
            Message::Close(Some(frame)) => Self::Close(CloseInfo {
                code: frame.code,
                reason: frame.reason.as_str().to_owned(),
                remote: true,
            }),
            Message::Close(None) => Self::Close(CloseInfo {
                code: close_code::NO_STATUS,
                reason: String::new(),
                remote: true,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn close_with_code_keeps_reason() {
        let msg = Outbound::Close {
            code: close_code::GOING_AWAY,
            reason: "shutdown".to_string(),
        }
        .into_message();
        let Message::Close(Some(frame)) = msg else {
            panic!("expected close frame with payload");
        };
        assert_eq!(frame.code, close_code::GOING_AWAY);
        assert_eq!(frame.reason.as_str(), "shutdown");
    }

    #[test]
    fn reserved_close_code_is_not_sent() {
        let msg = Outbound::Close {
            code: close_code::ABNORMAL,
            reason: "lost".to_string(),
        }
        .into_message();
        assert!(matches!(msg, Message::Close(None)));
    }

    #[test]
    fn inbound_text_and_binary() {
        assert_eq!(
            Inbound::from(Message::text("hi")),
            Inbound::Text("hi".to_string())
        );
        assert_eq!(
            Inbound::from(Message::Binary(Bytes::from_static(b"\x01\x02"))),
            Inbound::Binary(Bytes::from_static(b"\x01\x02"))
        );
        assert_eq!(
            Inbound::from(Message::Pong(Bytes::new())),
            Inbound::Control
        );
    }

    #[test]
    fn read_errors_map_to_close_codes() {
        let cases = [
            ("Space limit exceeded: Message too long: 100 > 16", close_code::TOO_BIG),
            ("WebSocket protocol error: Reserved bits are non-zero", close_code::PROTOCOL_ERROR),
            ("UTF-8 encoding error", close_code::INVALID_PAYLOAD),
            ("IO error: connection reset by peer", close_code::ABNORMAL),
        ];
        for (message, expected) in cases {
            let err = axum::Error::new(std::io::Error::other(message));
            assert_eq!(close_code::for_read_error(&err), expected, "{message}");
        }
    }

    #[test]
    fn bare_close_reports_no_status() {
        let Inbound::Close(info) = Inbound::from(Message::Close(None)) else {
            panic!("expected close");
        };
        assert_eq!(info.code, close_code::NO_STATUS);
        assert!(info.remote);
    }
}
