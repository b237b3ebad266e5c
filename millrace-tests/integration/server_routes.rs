//! Full routing stack: health endpoint plus content fallback.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use millrace_core::config::MillraceConfig;
use millrace_server::{AppState, router};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestServer {
    app: Router,
    _dir: TempDir,
}

impl TestServer {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let report: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(dir.path().join("report.txt"), report).unwrap();
        std::fs::write(dir.path().join("hello world.txt"), b"spaced out").unwrap();
        std::fs::create_dir(dir.path().join("public")).unwrap();

        let mut config = MillraceConfig::default();
        config.server.content_root = dir.path().to_path_buf();
        let app = router(AppState::new(&config), false);
        Self { app, _dir: dir }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, path: &str, headers: &[(header::HeaderName, &str)]) -> Response {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

#[tokio::test]
async fn test_health_endpoint_is_not_shadowed_by_content() {
    let server = TestServer::new();

    let response = server.get("/health", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
}

#[tokio::test]
async fn test_get_serves_file_with_validators() {
    let server = TestServer::new();

    let response = server.get("/report.txt", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::ETAG));
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    assert_eq!(body.len(), 1000);
}

#[tokio::test]
async fn test_range_request_through_full_stack() {
    let server = TestServer::new();

    let response = server
        .get("/report.txt", &[(header::RANGE, "bytes=0-499")])
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-499/1000"
    );
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    assert_eq!(body.len(), 500);
}

#[tokio::test]
async fn test_etag_revalidation_through_full_stack() {
    let server = TestServer::new();

    let first = server.get("/report.txt", &[]).await;
    let etag = first
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let revalidated = server
        .get("/report.txt", &[(header::IF_NONE_MATCH, etag.as_str())])
        .await;

    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    assert!(!revalidated.headers().contains_key(header::CONTENT_TYPE));
    let body = to_bytes(revalidated.into_body(), 1 << 16).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_missing_file_returns_json_404() {
    let server = TestServer::new();

    let response = server.get("/nope.txt", &[]).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"], "content not found");
}

#[tokio::test]
async fn test_unsatisfiable_range_returns_416_with_size() {
    let server = TestServer::new();

    let response = server
        .get("/report.txt", &[(header::RANGE, "bytes=5000-")])
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */1000"
    );
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_malformed_range_recovers_into_416_response() {
    let server = TestServer::new();

    let response = server
        .get("/report.txt", &[(header::RANGE, "bytes=oops")])
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */1000"
    );
    // This flavor went through error recovery, so it carries the JSON body.
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(parsed["error"].is_string());
}

#[tokio::test]
async fn test_head_request_has_headers_but_no_body() {
    let server = TestServer::new();

    let response = server
        .send(
            Request::builder()
                .method(Method::HEAD)
                .uri("/report.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "1000"
    );
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_write_methods_are_rejected_with_allow() {
    let server = TestServer::new();

    let response = server
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/report.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, HEAD");
}

#[tokio::test]
async fn test_traversal_attempts_stay_inside_the_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"outside").unwrap();
    let root = dir.path().join("public");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("ok.txt"), b"inside").unwrap();

    let mut config = MillraceConfig::default();
    config.server.content_root = root;
    let app = router(AppState::new(&config), false);

    let inside = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ok.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(inside.status(), StatusCode::OK);

    // Literal and percent-encoded traversal resolve below the root and
    // find nothing there; NUL bytes are rejected outright.
    for path in ["/../secret.txt", "/%2e%2e/secret.txt", "/secret%00.txt"] {
        let escaped = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(escaped.status(), StatusCode::NOT_FOUND, "path {path}");
    }
}

#[tokio::test]
async fn test_percent_encoded_names_resolve() {
    let server = TestServer::new();

    let response = server.get("/hello%20world.txt", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 1 << 16).await.unwrap();
    assert_eq!(&body[..], b"spaced out");
}

#[tokio::test]
async fn test_directory_paths_are_not_served() {
    let server = TestServer::new();

    let response = server.get("/public", &[]).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
