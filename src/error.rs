//! Server error types with HTTP status code mapping.
//!
//! [`ServerError`] is the central error type of the crate. It is returned by
//! the lifecycle and connection APIs, handed to
//! [`crate::handler::HttpWsHandler::on_server_error`], and, when it surfaces
//! during a plain HTTP request, rendered as a structured JSON response.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3001,
///     "message": "failed to bind 0.0.0.0:8080: address in use",
///     "details": "address in use"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see [`ServerError::error_code`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Underlying cause, when the error wraps one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status                        |
/// |-----------|------------|------------------------------------|
/// | 1000–1999 | Connection | 400 / 410 Gone / 503 Unavailable   |
/// | 2000–2999 | HTTP       | 500 / 504 Gateway Timeout          |
/// | 3000–3999 | Server     | 500 Internal Server Error          |
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind its socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the server tried to bind.
        addr: SocketAddr,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a server that was already started.
    #[error("server was already started")]
    AlreadyStarted,

    /// A send was attempted on a connection that is no longer open.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// The outbound queue of a connection is full.
    #[error("send queue of connection {0} is full")]
    SendQueueFull(ConnectionId),

    /// Protocol or I/O failure on a WebSocket connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// The application produced a response that cannot be sent.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The GET request callback did not finish in time.
    #[error("request timed out after {timeout_ms} ms")]
    RequestTimeout {
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ConnectionClosed(_) => 1001,
            Self::SendQueueFull(_) => 1002,
            Self::WebSocket(_) => 1003,
            Self::InvalidResponse(_) => 2001,
            Self::RequestTimeout { .. } => 2002,
            Self::Internal(_) => 3000,
            Self::Bind { .. } => 3001,
            Self::AlreadyStarted => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::WebSocket(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionClosed(_) => StatusCode::GONE,
            Self::SendQueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidResponse(_)
            | Self::Internal(_)
            | Self::Bind { .. }
            | Self::AlreadyStarted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: std::error::Error::source(&self).map(ToString::to_string),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_their_ranges() {
        let id = ConnectionId::new();
        assert_eq!(ServerError::ConnectionClosed(id).error_code() / 1000, 1);
        assert_eq!(ServerError::SendQueueFull(id).error_code() / 1000, 1);
        assert_eq!(
            ServerError::RequestTimeout { timeout_ms: 1000 }.error_code() / 1000,
            2
        );
        assert_eq!(ServerError::AlreadyStarted.error_code() / 1000, 3);
    }

    #[test]
    fn status_mapping() {
        let id = ConnectionId::new();
        assert_eq!(
            ServerError::ConnectionClosed(id).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            ServerError::RequestTimeout { timeout_ms: 50 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServerError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = ServerError::InvalidResponse("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_message_keeps_sub_second_deadline() {
        let err = ServerError::RequestTimeout { timeout_ms: 50 };
        assert_eq!(err.to_string(), "request timed out after 50 ms");
    }

    #[tokio::test]
    async fn response_body_carries_cause_as_details() {
        let Ok(addr) = "127.0.0.1:9".parse::<SocketAddr>() else {
            panic!("valid address");
        };
        let err = ServerError::Bind {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken"),
        };
        let response = err.into_response();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body expected");
        };
        let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            panic!("json expected");
        };
        assert_eq!(json["error"]["code"], 3001);
        assert_eq!(json["error"]["details"], "port taken");
    }

    #[tokio::test]
    async fn response_body_omits_details_without_cause() {
        let response = ServerError::AlreadyStarted.into_response();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body expected");
        };
        let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            panic!("json expected");
        };
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn bind_error_mentions_address() {
        let Ok(addr) = "127.0.0.1:9".parse::<SocketAddr>() else {
            panic!("valid address");
        };
        let err = ServerError::Bind {
            addr,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}
