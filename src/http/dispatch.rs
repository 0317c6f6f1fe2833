//! Request classification and plain HTTP answers.

use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use super::request_target;
use crate::app_state::AppState;
use crate::domain::ServerEvent;
use crate::error::ServerError;
use crate::ws;

/// Entry point for every request on the listener.
///
/// Requests whose `Upgrade` header is missing or blank are plain HTTP;
/// everything else must be a valid WebSocket handshake, otherwise the
/// handshake rejection is returned and the application never sees it.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    if !is_upgrade_request(&parts.headers) {
        return serve_http(&state, &parts).await;
    }

    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => ws::handler::accept(upgrade, &parts, state),
        Err(rejection) => {
            tracing::debug!(
                path = %parts.uri,
                reason = %rejection.body_text(),
                "rejected websocket handshake"
            );
            rejection.into_response()
        }
    }
}

/// Returns `true` when the `Upgrade` header holds anything but whitespace.
#[must_use]
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .is_some_and(|value| value.as_bytes().iter().any(|b| !b.is_ascii_whitespace()))
}

async fn serve_http(state: &AppState, parts: &Parts) -> Response {
    let path = request_target(&parts.uri);

    let response = if parts.method == Method::GET || parts.method == Method::HEAD {
        match answer_get(state, &path).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "http request failed");
                state.handler.on_server_error(None, &err).await;
                err.into_response()
            }
        }
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response()
    };

    let status = response.status().as_u16();
    tracing::debug!(method = %parts.method, path = %path, status, "http request served");
    state.event_bus.publish(ServerEvent::HttpRequestServed {
        path,
        status,
        timestamp: Utc::now(),
    });
    response
}

async fn answer_get(state: &AppState, path: &str) -> Result<Response, ServerError> {
    let limit = state.config.http_request_timeout;
    let result = if limit == Duration::ZERO {
        state.handler.on_get_request(path).await
    } else {
        tokio::time::timeout(limit, state.handler.on_get_request(path))
            .await
            .map_err(|_| ServerError::RequestTimeout {
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?
    };
    result?.into_response()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::HeaderValue;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;
    use crate::domain::{ConnectionRegistry, EventBus};
    use crate::handler::HttpWsHandler;
    use crate::http::{GetRequestResult, build_router};

    #[derive(Debug)]
    struct Pages;

    #[async_trait]
    impl HttpWsHandler for Pages {
        async fn on_get_request(&self, path: &str) -> Result<GetRequestResult, ServerError> {
            match path {
                "/" => Ok(GetRequestResult::html("<h1>home</h1>")),
                "/fail" => Err(ServerError::Internal("handler failed".to_string())),
                "/bad-status" => Ok(GetRequestResult::new(1000, "?", "text/plain", "")),
                "/slow" => {
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    Ok(GetRequestResult::text("late"))
                }
                other => Ok(GetRequestResult::new(
                    404,
                    "Not Found",
                    "text/plain",
                    format!("no page at {other}"),
                )),
            }
        }
    }

    fn make_state(bus: &EventBus) -> AppState {
        let Ok(addr) = "127.0.0.1:0".parse::<SocketAddr>() else {
            panic!("valid address");
        };
        let (_tx, shutdown) = watch::channel(false);
        AppState {
            handler: Arc::new(Pages),
            registry: Arc::new(ConnectionRegistry::new()),
            event_bus: bus.clone(),
            config: Arc::new(
                ServerConfig::new(addr)
                    .with_http_request_timeout(std::time::Duration::from_millis(50)),
            ),
            shutdown,
        }
    }

    async fn send(request: axum::http::Request<Body>) -> Response {
        let bus = EventBus::new(16);
        let router = build_router(make_state(&bus));
        let Ok(response) = router.oneshot(request).await else {
            panic!("router is infallible");
        };
        response
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        let Ok(request) = axum::http::Request::get(uri).body(Body::empty()) else {
            panic!("valid request");
        };
        request
    }

    async fn body_string(response: Response) -> String {
        let Ok(bytes) = to_bytes(response.into_body(), 1 << 20).await else {
            panic!("body readable");
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn upgrade_header_classification() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("   "));
        assert!(!is_upgrade_request(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));
    }

    #[tokio::test]
    async fn get_is_answered_by_handler() {
        let response = send(get("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONNECTION),
            Some(&HeaderValue::from_static("close"))
        );
        assert_eq!(body_string(response).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn handler_sees_query_string() {
        let response = send(get("/missing?x=1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "no page at /missing?x=1");
    }

    #[tokio::test]
    async fn blank_upgrade_header_is_plain_http() {
        let Ok(request) = axum::http::Request::get("/")
            .header(header::UPGRADE, " ")
            .body(Body::empty())
        else {
            panic!("valid request");
        };
        let response = send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_handshake_is_rejected() {
        let Ok(request) = axum::http::Request::get("/ws")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "upgrade")
            .body(Body::empty())
        else {
            panic!("valid request");
        };
        let response = send(request).await;
        assert!(response.status().is_client_error() || response.status().is_server_error());
    }

    #[tokio::test]
    async fn post_is_not_allowed() {
        let Ok(request) = axum::http::Request::post("/").body(Body::from("x")) else {
            panic!("valid request");
        };
        let response = send(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW),
            Some(&HeaderValue::from_static("GET, HEAD"))
        );
    }

    #[tokio::test]
    async fn handler_error_becomes_json_error() {
        let response = send(get("/fail")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) else {
            panic!("json body expected");
        };
        assert_eq!(json["error"]["code"], 3000);
    }

    #[tokio::test]
    async fn invalid_status_becomes_server_error() {
        let response = send(get("/bad-status")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let response = send(get("/slow")).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(body_string(response).await.contains("after 50 ms"));
    }

    #[tokio::test]
    async fn served_requests_are_published() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let router = build_router(make_state(&bus));
        let _ = router.oneshot(get("/")).await;

        let Ok(ServerEvent::HttpRequestServed { path, status, .. }) = events.recv().await else {
            panic!("expected HttpRequestServed");
        };
        assert_eq!(path, "/");
        assert_eq!(status, 200);
    }
}
