//! http-ws-server entry point.
//!
//! Serves a small chat page over plain HTTP and relays every WebSocket text
//! message to all open connections, on the same port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use http_ws_server::{
    CloseInfo, Connection, ConnectionRegistry, GetRequestResult, HttpWsHandler, HttpWsServer,
    ServerConfig, ServerError,
};

/// How long shutdown waits for clients to close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>http-ws-server</title></head>
<body>
<ul id="log"></ul>
<form id="form"><input id="msg" autocomplete="off"><button>Send</button></form>
<script>
const ws = new WebSocket(`ws://${location.host}/chat`);
const log = document.getElementById("log");
ws.onmessage = (e) => {
  const li = document.createElement("li");
  li.textContent = e.data;
  log.appendChild(li);
};
document.getElementById("form").onsubmit = (e) => {
  e.preventDefault();
  const input = document.getElementById("msg");
  ws.send(input.value);
  input.value = "";
};
</script>
</body>
</html>
"#;

/// Relays chat messages to every open connection.
#[derive(Debug)]
struct ChatRelay {
    registry: Arc<ConnectionRegistry>,
}

impl ChatRelay {
    async fn relay(&self, line: &str) -> usize {
        self.registry
            .for_each_open(|conn| {
                if let Err(err) = conn.send_text(line) {
                    tracing::debug!(conn_id = %conn.id(), error = %err, "relay skipped");
                }
            })
            .await
    }
}

#[async_trait]
impl HttpWsHandler for ChatRelay {
    async fn on_server_start(&self, local_addr: SocketAddr) {
        tracing::info!(addr = %local_addr, "chat relay ready");
    }

    async fn on_ws_open(&self, connection: &Connection) {
        let peer = peer_label(connection);
        self.relay(&format!("* {peer} joined")).await;
    }

    async fn on_ws_close(&self, connection: &Connection, close: &CloseInfo) {
        let peer = peer_label(connection);
        tracing::info!(peer = %peer, code = close.code, "chat client left");
        self.relay(&format!("* {peer} left")).await;
    }

    async fn on_ws_text(&self, connection: &Connection, message: String) {
        let peer = peer_label(connection);
        self.relay(&format!("{peer}: {message}")).await;
    }

    async fn on_get_request(&self, path: &str) -> Result<GetRequestResult, ServerError> {
        let page = path.split('?').next().unwrap_or_default();
        Ok(match page {
            "/" | "/index.html" => GetRequestResult::html(INDEX_HTML),
            "/health" => GetRequestResult::ok(
                "application/json",
                serde_json::json!({
                    "status": "healthy",
                    "clients": self.registry.len().await,
                    "version": env!("CARGO_PKG_VERSION"),
                })
                .to_string(),
            ),
            _ => GetRequestResult::not_found(),
        })
    }
}

fn peer_label(connection: &Connection) -> String {
    connection
        .remote_addr()
        .map_or_else(|| connection.id().to_string(), |addr| addr.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(addr = %config.listen_addr, "starting http-ws-server");

    let registry = Arc::new(ConnectionRegistry::new());
    let handler = ChatRelay {
        registry: Arc::clone(&registry),
    };
    let server = HttpWsServer::with_registry(config, registry, handler);

    server.start()?;
    if !server.was_started().await {
        anyhow::bail!("server failed to start");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    server.stop_with_timeout(SHUTDOWN_TIMEOUT).await?;

    Ok(())
}
