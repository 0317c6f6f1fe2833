//! Result of a plain HTTP GET request.

use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use hyper::ext::ReasonPhrase;

use crate::error::ServerError;

/// Response produced by [`crate::handler::HttpWsHandler::on_get_request`].
///
/// The server answers with `status_code`, a `Content-Type` of
/// `content_type`, a `Content-Length` equal to `content.len()` and
/// `Connection: close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequestResult {
    /// HTTP status code (100–999).
    pub status_code: u16,
    /// Reason phrase written on the status line. Falls back to the
    /// standard phrase for `status_code` when it is not a valid phrase.
    pub status_text: String,
    /// Value of the `Content-Type` header.
    pub content_type: String,
    /// Response body.
    pub content: Bytes,
}

impl GetRequestResult {
    /// Creates a result from its parts.
    #[must_use]
    pub fn new(
        status_code: u16,
        status_text: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// `200 OK` with the given content type and body.
    #[must_use]
    pub fn ok(content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self::new(200, "OK", content_type, content)
    }

    /// `200 OK` HTML page.
    #[must_use]
    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::ok("text/html; charset=utf-8", body)
    }

    /// `200 OK` plain text.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::ok("text/plain; charset=utf-8", body)
    }

    /// `404 Not Found` plain text.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(404, "Not Found", "text/plain; charset=utf-8", "Not Found")
    }

    /// Builds the HTTP response.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidResponse`] if the status code is out of
    /// range or the content type is not a valid header value.
    pub fn into_response(self) -> Result<Response, ServerError> {
        let status = StatusCode::from_u16(self.status_code).map_err(|_| {
            ServerError::InvalidResponse(format!("status code {}", self.status_code))
        })?;
        let content_type = HeaderValue::from_str(&self.content_type).map_err(|_| {
            ServerError::InvalidResponse(format!("content type {:?}", self.content_type))
        })?;
        let reason = custom_reason(status, self.status_text);

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, self.content.len())
            .header(header::CONNECTION, "close");
        if let Some(reason) = reason {
            builder = builder.extension(reason);
        }
        builder
            .body(Body::from(self.content))
            .map_err(|e| ServerError::InvalidResponse(e.to_string()))
    }
}

/// Reason phrase to override the standard one with, if any.
fn custom_reason(status: StatusCode, text: String) -> Option<ReasonPhrase> {
    if status.canonical_reason() == Some(text.as_str()) {
        return None;
    }
    match ReasonPhrase::try_from(text) {
        Ok(reason) => Some(reason),
        Err(err) => {
            tracing::debug!(
                status = status.as_u16(),
                error = ?err,
                "status text unusable, using standard reason phrase"
            );
            None
        }
    }
}
