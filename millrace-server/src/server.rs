//! Axum application wiring and request entry points.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use millrace_core::ContentDeliverer;
use millrace_core::config::MillraceConfig;
use millrace_core::runtime::{ConnectionContext, Runtime, RuntimeError};
use millrace_core::source::FsContentSource;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::handlers::{AccessLogHook, ErrorResponseHook, StaticContentHandler};

/// Shared application state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub local_addr: Option<SocketAddr>,
    client_counter: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: &MillraceConfig) -> Self {
        let deliverer = ContentDeliverer::new(Arc::new(FsContentSource));
        let handler =
            StaticContentHandler::new(deliverer, config.server.content_root.clone());
        let runtime = Runtime::builder()
            .concurrency_limit(config.runtime.concurrency_limit)
            .handler(Arc::new(handler))
            .hook(Arc::new(ErrorResponseHook))
            .hook(Arc::new(AccessLogHook))
            .build();

        Self {
            runtime: Arc::new(runtime),
            local_addr: None,
            client_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_client_id(&self) -> u64 {
        self.client_counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Builds the application router.
///
/// Every path not claimed by an explicit route falls through to content
/// delivery, so the served tree needs no route table of its own.
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .fallback(serve_content)
        .with_state(state);

    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "concurrency_limit": state.runtime.concurrency_limit(),
        "in_flight": state.runtime.in_flight(),
        "queued": state.runtime.queued(),
    }))
}

async fn serve_content(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, _body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let mut context = ConnectionContext::new(state.next_client_id());
    if let Some(addr) = remote_addr {
        context = context.with_remote_addr(addr);
    }
    if let Some(addr) = state.local_addr {
        context = context.with_local_addr(addr);
    }

    let request = Request::from_parts(parts, ());
    let replay = clone_envelope(&request);

    let response = match state.runtime.handle(&context, request).await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(
                client_id = context.client_id,
                %error,
                "request failed without recovery"
            );
            let status = match error {
                RuntimeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            status.into_response()
        }
    };

    // Termination hooks run once the response envelope is settled; the
    // transport streams the body out afterwards.
    state.runtime.terminate(&context, replay, &response).await;
    response
}

/// Copy of the request envelope for the terminate event; bodies are
/// already detached at this layer.
fn clone_envelope(request: &Request<()>) -> Request<()> {
    let mut copy = Request::new(());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.headers_mut() = request.headers().clone();
    copy
}

/// Binds the listener and serves until interrupted.
///
/// Ctrl-C closes the runtime limiter first, so queued requests drain with
/// 503s while in-flight ones complete.
pub async fn run_server(config: MillraceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = AppState::new(&config);

    let listener = tokio::net::TcpListener::bind(config.server.bind_address).await?;
    let local_addr = listener.local_addr()?;
    state.local_addr = Some(local_addr);

    let runtime = state.runtime.clone();
    let app = router(state, config.server.enable_cors);

    tracing::info!(
        address = %local_addr,
        root = %config.server.content_root.display(),
        "serving content"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(runtime))
    .await?;

    Ok(())
}

async fn shutdown_signal(runtime: Arc<Runtime>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received, draining requests");
    runtime.shutdown();
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::http::header;
    use tower::ServiceExt;

    use super::*;

    fn test_router(root: &std::path::Path) -> Router {
        let mut config = MillraceConfig::default();
        config.server.content_root = root.to_path_buf();
        router(AppState::new(&config), false)
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_runtime_counters() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 16)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["concurrency_limit"], 100);
        assert_eq!(parsed["in_flight"], 0);
    }

    #[tokio::test]
    async fn test_fallback_serves_content_with_validators() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("hello.txt")).unwrap();
        file.write_all(b"hello, ranges").unwrap();

        let app = test_router(dir.path());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/hello.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));
        assert_eq!(
            response.headers().get(header::ACCEPT_RANGES).unwrap(),
            "bytes"
        );
        let body = axum::body::to_bytes(response.into_body(), 1 << 16)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello, ranges");
    }
}
