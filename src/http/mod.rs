//! HTTP layer: request classification, plain GET answers, router
//! composition.
//!
//! Every request on the listener goes through [`dispatch::dispatch`]. A
//! request without a non-blank `Upgrade` header is plain HTTP and is
//! answered by the application; anything else is a WebSocket handshake.

pub mod dispatch;
pub mod get_request;

use axum::Router;
use axum::http::Uri;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub use get_request::GetRequestResult;

/// Builds the router serving both HTTP and WebSocket traffic.
pub fn build_router(state: AppState) -> Router {
    let cors_permissive = state.config.cors_permissive;
    let router = Router::new()
        .fallback(dispatch::dispatch)
        .layer(TraceLayer::new_for_http());
    let router = if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

/// Request target as the application sees it: path plus `?query`.
pub(crate) fn request_target(uri: &Uri) -> String {
    match (uri.path(), uri.query()) {
        ("", _) => "/".to_string(),
        (path, Some(query)) => format!("{path}?{query}"),
        (path, None) => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_keeps_query() {
        let uri: Uri = "http://localhost/a/b?x=1".parse().unwrap_or_default();
        assert_eq!(request_target(&uri), "/a/b?x=1");
    }

    #[test]
    fn request_target_of_origin_form() {
        let uri = Uri::from_static("/index.html");
        assert_eq!(request_target(&uri), "/index.html");
    }
}
