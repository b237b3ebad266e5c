//! Byte-range delivery against real files on disk.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use millrace_core::delivery::{ContentDeliverer, DeliveryError};
use millrace_core::source::FsContentSource;
use tempfile::TempDir;

fn thousand_bytes() -> Vec<u8> {
    (0..=255u8).cycle().take(1000).collect()
}

fn content_dir(data: &[u8]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin"), data).unwrap();
    dir
}

async fn serve(dir: &TempDir, range: Option<&str>) -> Result<Response, DeliveryError> {
    let deliverer = ContentDeliverer::new(Arc::new(FsContentSource));
    let mut builder = Request::builder().method(Method::GET).uri("/data.bin");
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range);
    }
    let request = builder.body(()).unwrap();
    deliverer
        .deliver(&request, &dir.path().join("data.bin"))
        .await
}

async fn body_of(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), 1 << 20).await.unwrap().to_vec()
}

/// Offset of the first byte following `marker` in `body`.
fn payload_after(body: &[u8], marker: &[u8]) -> usize {
    let at = body
        .windows(marker.len())
        .position(|window| window == marker)
        .unwrap();
    at + marker.len()
}

#[tokio::test]
async fn test_explicit_range_returns_exact_slice() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=0-499")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-499/1000"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "500"
    );
    assert_eq!(body_of(response).await, &data[..500]);
}

#[tokio::test]
async fn test_interior_range_matches_source_offsets() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=123-456")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 123-456/1000"
    );
    assert_eq!(body_of(response).await, &data[123..=456]);
}

#[tokio::test]
async fn test_suffix_range_returns_tail() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=-100")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 900-999/1000"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "100"
    );
    assert_eq!(body_of(response).await, &data[900..]);
}

#[tokio::test]
async fn test_oversized_suffix_clamps_to_whole_resource() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=-5000")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-999/1000"
    );
    assert_eq!(body_of(response).await, data);
}

#[tokio::test]
async fn test_end_past_resource_clamps_to_last_byte() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=900-1500")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 900-999/1000"
    );
    assert_eq!(body_of(response).await, &data[900..]);
}

#[tokio::test]
async fn test_disjoint_ranges_build_multipart_with_precomputed_length() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=0-99,200-299")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let boundary = content_type
        .strip_prefix("multipart/byteranges; boundary=")
        .unwrap()
        .to_string();
    let advertised: usize = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = body_of(response).await;
    assert_eq!(body.len(), advertised);

    let rendered = String::from_utf8_lossy(&body);
    assert_eq!(rendered.matches(&format!("--{boundary}")).count(), 3);
    assert!(rendered.contains("Content-Range: bytes 0-99/1000"));
    assert!(rendered.contains("Content-Range: bytes 200-299/1000"));
    assert!(body.ends_with(format!("--{boundary}--\r\n").as_bytes()));

    // Each part's payload starts after its header's blank line.
    let first = payload_after(&body, b"bytes 0-99/1000\r\n\r\n");
    assert_eq!(&body[first..first + 100], &data[..100]);
    let second = payload_after(&body, b"bytes 200-299/1000\r\n\r\n");
    assert_eq!(&body[second..second + 100], &data[200..300]);
}

#[tokio::test]
async fn test_range_past_end_is_unsatisfiable() {
    let dir = content_dir(&thousand_bytes());

    let response = serve(&dir, Some("bytes=1500-")).await.unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */1000"
    );
    assert!(body_of(response).await.is_empty());
}

#[tokio::test]
async fn test_range_sum_overflow_serves_full_body() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, Some("bytes=0-699,100-799,200-899"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "1000"
    );
    assert!(!response.headers().contains_key(header::CONTENT_RANGE));
    assert_eq!(body_of(response).await, data);
}

#[tokio::test]
async fn test_no_range_header_serves_full_body() {
    let data = thousand_bytes();
    let dir = content_dir(&data);

    let response = serve(&dir, None).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCEPT_RANGES).unwrap(),
        "bytes"
    );
    assert_eq!(body_of(response).await, data);
}

#[tokio::test]
async fn test_repeated_range_requests_are_byte_identical() {
    let dir = content_dir(&thousand_bytes());

    let first = serve(&dir, Some("bytes=250-749")).await.unwrap();
    let second = serve(&dir, Some("bytes=250-749")).await.unwrap();

    assert_eq!(first.status(), second.status());
    assert_eq!(
        first.headers().get(header::ETAG),
        second.headers().get(header::ETAG)
    );
    assert_eq!(
        first.headers().get(header::CONTENT_RANGE),
        second.headers().get(header::CONTENT_RANGE)
    );
    assert_eq!(body_of(first).await, body_of(second).await);
}

#[tokio::test]
async fn test_malformed_range_surfaces_protocol_error() {
    let dir = content_dir(&thousand_bytes());

    let error = serve(&dir, Some("bytes=zz-qq")).await.unwrap_err();

    match error {
        DeliveryError::Range(range_error) => assert_eq!(range_error.resource_size(), 1000),
        other => panic!("expected range error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_range_unit_surfaces_protocol_error() {
    let dir = content_dir(&thousand_bytes());

    let error = serve(&dir, Some("items=0-1")).await.unwrap_err();

    assert!(matches!(error, DeliveryError::Range(_)));
}
