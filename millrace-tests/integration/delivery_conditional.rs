//! Conditional request evaluation against real files.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::http::{HeaderName, Method, Request, StatusCode, header};
use axum::response::Response;
use millrace_core::delivery::ContentDeliverer;
use millrace_core::source::FsContentSource;
use tempfile::TempDir;

struct Fixture {
    deliverer: ContentDeliverer,
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), b"<html>fixture</html>").unwrap();
        Self {
            deliverer: ContentDeliverer::new(Arc::new(FsContentSource)),
            dir,
        }
    }

    async fn request(&self, method: Method, headers: &[(HeaderName, String)]) -> Response {
        let mut builder = Request::builder().method(method).uri("/page.html");
        for (name, value) in headers {
            builder = builder.header(name, value.as_str());
        }
        let request = builder.body(()).unwrap();
        self.deliverer
            .deliver(&request, &self.dir.path().join("page.html"))
            .await
            .unwrap()
    }

    /// Learns the current validators from an unconditional GET.
    async fn validators(&self) -> (String, String) {
        let response = self.request(Method::GET, &[]).await;
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        (etag, last_modified)
    }
}

const EPOCH_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[tokio::test]
async fn test_if_none_match_revalidation_round_trip() {
    let fixture = Fixture::new();
    let (etag, _) = fixture.validators().await;

    let response = fixture
        .request(Method::GET, &[(header::IF_NONE_MATCH, etag.clone())])
        .await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(
        response.headers().get(header::ETAG).unwrap().to_str().unwrap(),
        etag
    );
    assert!(!response.headers().contains_key(header::CONTENT_TYPE));
    assert!(!response.headers().contains_key(header::CONTENT_LENGTH));
    assert!(
        to_bytes(response.into_body(), 1 << 16)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_if_none_match_ignores_weak_prefix() {
    let fixture = Fixture::new();
    let (etag, _) = fixture.validators().await;

    let response = fixture
        .request(Method::GET, &[(header::IF_NONE_MATCH, format!("W/{etag}"))])
        .await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_if_match_wildcard_proceeds() {
    let fixture = Fixture::new();

    let response = fixture
        .request(Method::GET, &[(header::IF_MATCH, "*".to_string())])
        .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_if_match_stale_tag_fails_precondition() {
    let fixture = Fixture::new();

    let response = fixture
        .request(Method::GET, &[(header::IF_MATCH, "\"stale\"".to_string())])
        .await;

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(response.headers().contains_key(header::ETAG));
}

#[tokio::test]
async fn test_if_modified_since_with_current_date_is_not_modified() {
    let fixture = Fixture::new();
    let (_, last_modified) = fixture.validators().await;

    let response = fixture
        .request(Method::GET, &[(header::IF_MODIFIED_SINCE, last_modified)])
        .await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_if_modified_since_with_old_date_serves_body() {
    let fixture = Fixture::new();

    let response = fixture
        .request(
            Method::GET,
            &[(header::IF_MODIFIED_SINCE, EPOCH_DATE.to_string())],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_if_unmodified_since_with_old_date_fails() {
    let fixture = Fixture::new();

    let response = fixture
        .request(
            Method::GET,
            &[(header::IF_UNMODIFIED_SINCE, EPOCH_DATE.to_string())],
        )
        .await;

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_if_none_match_on_write_method_fails_precondition() {
    let fixture = Fixture::new();
    let (etag, _) = fixture.validators().await;

    let response = fixture
        .request(Method::POST, &[(header::IF_NONE_MATCH, etag)])
        .await;

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_if_range_with_current_etag_honors_range() {
    let fixture = Fixture::new();
    let (etag, _) = fixture.validators().await;

    let response = fixture
        .request(
            Method::GET,
            &[
                (header::RANGE, "bytes=0-4".to_string()),
                (header::IF_RANGE, etag),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "5"
    );
}

#[tokio::test]
async fn test_if_range_with_stale_etag_discards_range() {
    let fixture = Fixture::new();

    let response = fixture
        .request(
            Method::GET,
            &[
                (header::RANGE, "bytes=0-4".to_string()),
                (header::IF_RANGE, "\"stale\"".to_string()),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(header::CONTENT_RANGE));
}

#[tokio::test]
async fn test_if_range_with_matching_date_honors_range() {
    let fixture = Fixture::new();
    let (_, last_modified) = fixture.validators().await;

    let response = fixture
        .request(
            Method::GET,
            &[
                (header::RANGE, "bytes=0-4".to_string()),
                (header::IF_RANGE, last_modified),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
}

#[tokio::test]
async fn test_repeated_conditional_round_trips_are_stable() {
    let fixture = Fixture::new();
    let (first_etag, _) = fixture.validators().await;
    let (second_etag, _) = fixture.validators().await;

    assert_eq!(first_etag, second_etag);
}
