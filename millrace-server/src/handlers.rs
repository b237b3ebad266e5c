//! Request handler and lifecycle hooks for static content.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use millrace_core::delivery::ContentDeliverer;
use millrace_core::runtime::{
    ConnectionContext, ErrorEvent, HttpError, LifecycleHook, RequestHandler, RuntimeError,
    TerminateEvent,
};

/// Serves files beneath a fixed content root.
pub struct StaticContentHandler {
    deliverer: ContentDeliverer,
    content_root: PathBuf,
}

impl StaticContentHandler {
    pub fn new(deliverer: ContentDeliverer, content_root: PathBuf) -> Self {
        Self {
            deliverer,
            content_root,
        }
    }

    /// Maps a request path onto the content root.
    ///
    /// Decodes percent escapes, then resolves the path lexically: normal
    /// segments descend, `..` pops but never above the root, and all
    /// other components are dropped. The result cannot escape the root.
    /// Paths carrying NUL bytes resolve to `None`.
    fn resolve_path(&self, request_path: &str) -> Option<PathBuf> {
        let decoded =
            urlencoding::decode(request_path).unwrap_or_else(|_| request_path.into());
        if decoded.contains('\0') {
            return None;
        }

        let mut resolved = self.content_root.clone();
        let mut depth = 0usize;
        for component in Path::new(decoded.as_ref()).components() {
            match component {
                Component::Normal(segment) => {
                    resolved.push(segment);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth > 0 {
                        resolved.pop();
                        depth -= 1;
                    }
                }
                _ => {}
            }
        }
        Some(resolved)
    }
}

#[async_trait]
impl RequestHandler for StaticContentHandler {
    async fn handle(
        &self,
        context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError> {
        if !matches!(*request.method(), Method::GET | Method::HEAD) {
            return Err(HttpError::new(StatusCode::METHOD_NOT_ALLOWED)
                .with_header(header::ALLOW, HeaderValue::from_static("GET, HEAD"))
                .into());
        }

        let Some(path) = self.resolve_path(request.uri().path()) else {
            return Err(HttpError::new(StatusCode::NOT_FOUND)
                .with_message("content not found")
                .into());
        };
        tracing::debug!(
            client_id = context.client_id,
            path = %path.display(),
            "delivering content"
        );

        Ok(self.deliverer.deliver(&request, &path).await?)
    }
}

/// Converts unrecovered failures into minimal JSON error responses.
///
/// For structured HTTP errors the runtime re-applies the recorded status
/// and headers afterwards, so this hook only decides the body.
pub struct ErrorResponseHook;

#[async_trait]
impl LifecycleHook for ErrorResponseHook {
    async fn on_error(&self, event: ErrorEvent) -> ErrorEvent {
        let (status, message) = match event.error() {
            RuntimeError::Http(http) => (http.status(), http.message().to_string()),
            RuntimeError::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting down".to_string(),
            ),
            RuntimeError::Handler(error) => {
                tracing::error!(
                    client_id = event.context().client_id,
                    %error,
                    "handler failure"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message }).to_string();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        event.supply_response(response)
    }
}

/// Emits one structured access-log line per completed request.
pub struct AccessLogHook;

#[async_trait]
impl LifecycleHook for AccessLogHook {
    async fn on_terminate(&self, event: &TerminateEvent) {
        tracing::info!(
            client_id = event.context.client_id,
            remote = ?event.context.remote_addr,
            method = %event.request.method(),
            path = event.request.uri().path(),
            status = event.status.as_u16(),
            "request completed"
        );
    }
}
