//! Server configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Embedders and tests can also build a
//! [`ServerConfig`] in code with [`ServerConfig::new`] and the `with_*`
//! setters.

use std::net::SocketAddr;
use std::time::Duration;

/// Default bind address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default maximum inbound message and frame size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 << 20;

/// Top-level server configuration.
///
/// Loaded once at startup via [`ServerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the listener to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Set `SO_REUSEADDR` on the listening socket.
    pub reuse_addr: bool,

    /// Set `TCP_NODELAY` on every accepted socket.
    pub tcp_nodelay: bool,

    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,

    /// Largest inbound WebSocket frame accepted, in bytes.
    pub max_frame_size: usize,

    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,

    /// Keepalive ping interval. Zero disables pings and lost-connection
    /// detection.
    pub ping_interval: Duration,

    /// Deadline for answering a plain HTTP GET request.
    pub http_request_timeout: Duration,

    /// Capacity of the lifecycle event broadcast channel.
    pub event_bus_capacity: usize,

    /// Apply a permissive CORS policy to HTTP responses.
    pub cors_permissive: bool,
}

impl ServerConfig {
    /// Creates a configuration bound to `listen_addr` with default settings.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            reuse_addr: true,
            tcp_nodelay: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_queue_capacity: 1024,
            ping_interval: Duration::from_secs(60),
            http_request_timeout: Duration::from_secs(30),
            event_bus_capacity: 1024,
            cors_permissive: false,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()?;
        let defaults = Self::new(listen_addr);

        Ok(Self {
            listen_addr,
            reuse_addr: parse_env_bool("REUSE_ADDR", defaults.reuse_addr),
            tcp_nodelay: parse_env_bool("TCP_NODELAY", defaults.tcp_nodelay),
            max_message_size: parse_env("WS_MAX_MESSAGE_SIZE", defaults.max_message_size),
            max_frame_size: parse_env("WS_MAX_FRAME_SIZE", defaults.max_frame_size),
            send_queue_capacity: parse_env(
                "WS_SEND_QUEUE_CAPACITY",
                defaults.send_queue_capacity,
            )
            .max(1),
            ping_interval: Duration::from_secs(parse_env(
                "WS_PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )),
            http_request_timeout: Duration::from_secs(parse_env(
                "HTTP_REQUEST_TIMEOUT_SECS",
                defaults.http_request_timeout.as_secs(),
            )),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity)
                .max(1),
            cors_permissive: parse_env_bool("CORS_PERMISSIVE", defaults.cors_permissive),
        })
    }

    /// Sets the keepalive ping interval (zero disables it).
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the per-connection outbound queue capacity (minimum 1).
    #[must_use]
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the deadline for plain HTTP GET callbacks.
    #[must_use]
    pub fn with_http_request_timeout(mut self, timeout: Duration) -> Self {
        self.http_request_timeout = timeout;
        self
    }

    /// Sets the maximum inbound message size in bytes.
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Enables or disables `SO_REUSEADDR` on the listener.
    #[must_use]
    pub fn with_reuse_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = reuse;
        self
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    parse_bool(std::env::var(key).ok().as_deref(), default)
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(Some("TRUE"), false));
        assert!(parse_bool(Some("1"), false));
        assert!(!parse_bool(Some("False"), true));
        assert!(!parse_bool(Some("0"), true));
    }

    #[test]
    fn parse_bool_falls_back_to_default() {
        assert!(parse_bool(None, true));
        assert!(!parse_bool(Some("yes"), false));
    }

    #[test]
    fn parse_env_missing_uses_default() {
        let value: u64 = parse_env("HTTP_WS_SERVER_TEST_SURELY_UNSET", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn new_uses_defaults() {
        let Ok(addr) = "127.0.0.1:0".parse() else {
            panic!("valid address");
        };
        let cfg = ServerConfig::new(addr);
        assert!(cfg.reuse_addr);
        assert!(cfg.tcp_nodelay);
        assert_eq!(cfg.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(cfg.ping_interval, Duration::from_secs(60));
    }

    #[test]
    fn queue_capacity_never_zero() {
        let Ok(addr) = "127.0.0.1:0".parse() else {
            panic!("valid address");
        };
        let cfg = ServerConfig::new(addr).with_send_queue_capacity(0);
        assert_eq!(cfg.send_queue_capacity, 1);
    }
}
