//! `multipart/byteranges` framing.
//!
//! The response `Content-Length` for multipart mode is computed by formula
//! before any file byte is read, so the framing text and the length math
//! must never drift apart. Both the size calculator and the streaming code
//! therefore go through the same `part_header` and `closing_delimiter`
//! helpers.

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::delivery::range::ByteRange;

/// Separator between a part's byte slice and the next delimiter line.
pub(crate) const PART_TRAILER: &str = "\r\n";

/// Characters in a generated boundary token.
const BOUNDARY_LEN: usize = 30;

/// Generates a high-entropy, MIME-safe boundary token.
pub(crate) fn generate_boundary() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

/// Framing for one multipart response: boundary, part content type, and
/// the resource size quoted in every `Content-Range` line.
#[derive(Debug, Clone)]
pub(crate) struct MultipartFraming {
    boundary: String,
    content_type: String,
    resource_size: u64,
}

impl MultipartFraming {
    pub(crate) fn new(boundary: String, content_type: String, resource_size: u64) -> Self {
        Self {
            boundary,
            content_type,
            resource_size,
        }
    }

    /// Value for the response-level `Content-Type` header.
    pub(crate) fn response_content_type(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    /// Delimiter line plus part headers plus the blank separator line.
    ///
    /// Emitted verbatim by the streamer and measured by `content_length`.
    pub(crate) fn part_header(&self, range: &ByteRange) -> String {
        format!(
            "--{}\r\nContent-Type: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
            self.boundary,
            self.content_type,
            range.start,
            range.end(),
            self.resource_size,
        )
    }

    /// Final delimiter; the preceding part's trailer supplies its CRLF.
    pub(crate) fn closing_delimiter(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }

    /// Exact body length in bytes, computed without reading the resource.
    pub(crate) fn content_length(&self, ranges: &[ByteRange]) -> u64 {
        let parts: u64 = ranges
            .iter()
            .map(|range| {
                self.part_header(range).len() as u64 + range.length + PART_TRAILER.len() as u64
            })
            .sum();
        parts + self.closing_delimiter().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framing() -> MultipartFraming {
        MultipartFraming::new("B".to_string(), "text/plain".to_string(), 1000)
    }

    #[test]
    fn test_boundary_is_mime_safe() {
        let first = generate_boundary();
        let second = generate_boundary();

        assert_eq!(first.len(), BOUNDARY_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_part_header_wire_format() {
        let range = ByteRange {
            start: 0,
            length: 100,
        };
        assert_eq!(
            framing().part_header(&range),
            "--B\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-99/1000\r\n\r\n"
        );
    }

    #[test]
    fn test_closing_delimiter_wire_format() {
        assert_eq!(framing().closing_delimiter(), "--B--\r\n");
    }

    #[test]
    fn test_content_length_matches_hand_assembled_body() {
        let ranges = [
            ByteRange {
                start: 0,
                length: 100,
            },
            ByteRange {
                start: 200,
                length: 100,
            },
        ];

        // The wire bytes spelled out by hand, with 100 payload bytes per part.
        let expected = "--B\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-99/1000\r\n\r\n"
            .len() as u64
            + 100
            + 2
            + "--B\r\nContent-Type: text/plain\r\nContent-Range: bytes 200-299/1000\r\n\r\n".len()
                as u64
            + 100
            + 2
            + "--B--\r\n".len() as u64;

        assert_eq!(framing().content_length(&ranges), expected);
    }
}
