//! Framing properties under randomized range requests.
//!
//! Multipart Content-Length is computed by formula before any file bytes
//! are read; these properties pin the formula to the bytes actually
//! streamed.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use millrace_core::delivery::ContentDeliverer;
use millrace_core::source::{ContentMetadata, ContentReader, ContentSource};
use proptest::prelude::*;

struct MemorySource {
    data: Bytes,
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn stat(&self, _path: &Path) -> io::Result<ContentMetadata> {
        Ok(ContentMetadata {
            size: self.data.len() as u64,
            modified: None,
            is_dir: false,
        })
    }

    async fn open(&self, _path: &Path) -> io::Result<Box<dyn ContentReader>> {
        Ok(Box::new(std::io::Cursor::new(self.data.to_vec())))
    }
}

fn patterned(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

async fn deliver(data: Vec<u8>, range_header: &str) -> Response {
    let deliverer = ContentDeliverer::new(Arc::new(MemorySource {
        data: Bytes::from(data),
    }));
    let request = Request::builder()
        .method(Method::GET)
        .uri("/blob.bin")
        .header(header::RANGE, range_header)
        .body(())
        .unwrap();
    deliverer
        .deliver(&request, Path::new("/blob.bin"))
        .await
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever mode a range request lands in, an advertised
    /// Content-Length equals the streamed byte count.
    #[test]
    fn advertised_content_length_matches_streamed_bytes(
        size in 1usize..4096,
        raw_specs in proptest::collection::vec((0u64..5000u64, 0u64..5000u64), 1..5),
    ) {
        tokio_test::block_on(async move {
            let specs: Vec<String> = raw_specs
                .iter()
                .map(|(a, b)| {
                    let (start, end) = if a <= b { (*a, *b) } else { (*b, *a) };
                    format!("{start}-{end}")
                })
                .collect();
            let response = deliver(patterned(size), &format!("bytes={}", specs.join(","))).await;

            let advertised = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .map(|value| value.to_str().unwrap().parse::<usize>().unwrap());
            let body = to_bytes(response.into_body(), 1 << 23).await.unwrap();

            match advertised {
                Some(advertised) => assert_eq!(advertised, body.len()),
                None => assert!(body.is_empty()),
            }
        });
    }

    /// Two in-bounds disjoint ranges always frame as exactly two
    /// multipart parts plus the closing delimiter.
    #[test]
    fn disjoint_ranges_produce_exact_multipart_framing(
        size in 64u64..2048,
        first_start in 0u64..16,
        part_len in 1u64..16,
        gap in 1u64..16,
    ) {
        // Both parts live in the first 64 bytes, so they stay in bounds
        // and their sum can never trip the full-body fallback.
        let first_end = first_start + part_len - 1;
        let second_start = first_end + 1 + gap;
        let second_end = second_start + part_len - 1;

        tokio_test::block_on(async move {
            let header_value =
                format!("bytes={first_start}-{first_end},{second_start}-{second_end}");
            let response = deliver(patterned(size as usize), &header_value).await;

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

            let body = to_bytes(response.into_body(), 1 << 23).await.unwrap();
            assert_eq!(body.len(), advertised);

            let rendered = String::from_utf8_lossy(&body);
            assert_eq!(rendered.matches(&format!("--{boundary}")).count(), 3);
            assert!(rendered.contains(&format!(
                "Content-Range: bytes {first_start}-{first_end}/{size}"
            )));
            assert!(rendered.contains(&format!(
                "Content-Range: bytes {second_start}-{second_end}/{size}"
            )));
            assert!(body.ends_with(format!("--{boundary}--\r\n").as_bytes()));
        });
    }

    /// A single in-bounds range streams exactly `end - start + 1` bytes
    /// matching the source at that offset.
    #[test]
    fn single_range_streams_exact_slice(
        size in 2u64..4096,
        start_seed in 0u64..4096,
        len_seed in 1u64..4096,
    ) {
        let start = start_seed % (size - 1);
        let end = (start + len_seed).min(size - 1);
        let expected_len = end - start + 1;

        tokio_test::block_on(async move {
            let data = patterned(size as usize);
            let response = deliver(data.clone(), &format!("bytes={start}-{end}")).await;

            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(
                response.headers().get(header::CONTENT_RANGE).unwrap(),
                &format!("bytes {start}-{end}/{size}")
            );

            let body = to_bytes(response.into_body(), 1 << 23).await.unwrap();
            assert_eq!(body.len() as u64, expected_len);
            assert_eq!(&body[..], &data[start as usize..=end as usize]);
        });
    }
}
