//! HTTP `Range` header parsing.
//!
//! Turns a raw `Range` header value into a validated, size-clamped list of
//! byte ranges. Suffix (`-N`), prefix (`N-`), and explicit (`N-M`) forms
//! are supported, including multi-range headers. Specs that cannot overlap
//! the resource are skipped; a header consisting only of such specs is
//! unsatisfiable and the caller answers 416 with `Content-Range: bytes
//! */<size>`.

use thiserror::Error;

/// One contiguous byte slice of a resource.
///
/// The parser only ever produces in-bounds, non-empty ranges:
/// `length >= 1` and `start + length <= resource size` hold for every
/// range it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Offset of the first byte.
    pub start: u64,
    /// Number of bytes in the slice.
    pub length: u64,
}

impl ByteRange {
    /// Inclusive offset of the last byte, as used in `Content-Range`.
    pub fn end(&self) -> u64 {
        self.start + self.length - 1
    }
}

/// Outcome of parsing a syntactically valid `Range` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSet {
    /// Usable ranges in header order. Empty means "serve the full body"
    /// (no ranges were requested, or only empty specs appeared).
    Ranges(Vec<ByteRange>),
    /// Every spec missed the resource entirely; answer 416 with
    /// `Content-Range: bytes */<size>`.
    Unsatisfiable,
}

/// Malformed `Range` header, a protocol-class failure.
///
/// Each variant carries the resource size so the 416 conversion can emit
/// a correctly formed `Content-Range: bytes */<size>` header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Range unit is not bytes: {header:?}")]
    UnsupportedUnit { header: String, resource_size: u64 },

    #[error("Malformed range spec: {spec:?}")]
    MalformedSpec { spec: String, resource_size: u64 },

    #[error("Range start {start} exceeds end {end}")]
    StartExceedsEnd {
        start: u64,
        end: u64,
        resource_size: u64,
    },
}

impl RangeError {
    /// Size of the resource the failed request addressed.
    pub fn resource_size(&self) -> u64 {
        match self {
            RangeError::UnsupportedUnit { resource_size, .. }
            | RangeError::MalformedSpec { resource_size, .. }
            | RangeError::StartExceedsEnd { resource_size, .. } => *resource_size,
        }
    }
}

/// Parses a `Range` header value against a resource of `resource_size` bytes.
///
/// An empty header value means no ranges were requested. Specs are split
/// on `,`, trimmed, and classified individually; empty specs are skipped
/// outright, while specs starting at or past the end of the resource are
/// skipped with a no-overlap note. If that note is set and nothing usable
/// remains, the whole set is `Unsatisfiable`.
///
/// Whether an unsatisfiable set on a zero-byte resource should still serve
/// the full body is caller policy, as is discarding range sets whose
/// summed length exceeds the resource.
pub fn parse_range_header(header: &str, resource_size: u64) -> Result<RangeSet, RangeError> {
    if header.is_empty() {
        return Ok(RangeSet::Ranges(Vec::new()));
    }

    let Some(spec_list) = header.strip_prefix("bytes=") else {
        return Err(RangeError::UnsupportedUnit {
            header: header.to_string(),
            resource_size,
        });
    };

    let mut ranges = Vec::new();
    let mut overlap_miss = false;

    for spec in spec_list.split(',').map(str::trim) {
        if spec.is_empty() {
            continue;
        }

        match parse_spec(spec, resource_size)? {
            Some(range) => ranges.push(range),
            None => overlap_miss = true,
        }
    }

    if ranges.is_empty() && overlap_miss {
        return Ok(RangeSet::Unsatisfiable);
    }
    Ok(RangeSet::Ranges(ranges))
}

/// Total byte count of a range set, saturating on pathological inputs.
pub fn total_length(ranges: &[ByteRange]) -> u64 {
    ranges
        .iter()
        .fold(0u64, |sum, range| sum.saturating_add(range.length))
}

/// Classifies one trimmed spec. `Ok(None)` marks a no-overlap skip.
fn parse_spec(spec: &str, resource_size: u64) -> Result<Option<ByteRange>, RangeError> {
    let malformed = || RangeError::MalformedSpec {
        spec: spec.to_string(),
        resource_size,
    };

    if let Some(suffix) = spec.strip_prefix('-') {
        // Suffix form: last N bytes, clamped to the whole resource.
        let requested: u64 = suffix.parse().map_err(|_| malformed())?;
        let length = requested.min(resource_size);
        let start = resource_size - length;
        if start >= resource_size {
            // Covers `-0` and any suffix against an empty resource.
            return Ok(None);
        }
        return Ok(Some(ByteRange { start, length }));
    }

    if let Some(prefix) = spec.strip_suffix('-') {
        // Prefix form: from N through the end of the resource.
        let start: u64 = prefix.parse().map_err(|_| malformed())?;
        if start >= resource_size {
            return Ok(None);
        }
        return Ok(Some(ByteRange {
            start,
            length: resource_size - start,
        }));
    }

    // Explicit form: N-M inclusive, end clamped to the last byte.
    let (raw_start, raw_end) = spec.split_once('-').ok_or_else(malformed)?;
    let start: u64 = raw_start.parse().map_err(|_| malformed())?;
    let end: u64 = raw_end.parse().map_err(|_| malformed())?;

    if start > end {
        return Err(RangeError::StartExceedsEnd {
            start,
            end,
            resource_size,
        });
    }
    if start >= resource_size {
        return Ok(None);
    }

    let end = end.min(resource_size - 1);
    Ok(Some(ByteRange {
        start,
        length: end - start + 1,
    }))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ranges(header: &str, size: u64) -> Vec<ByteRange> {
        match parse_range_header(header, size).unwrap() {
            RangeSet::Ranges(ranges) => ranges,
            RangeSet::Unsatisfiable => panic!("expected satisfiable ranges for {header:?}"),
        }
    }

    #[test]
    fn test_empty_header_requests_full_body() {
        assert_eq!(parse_range_header("", 1000), Ok(RangeSet::Ranges(vec![])));
    }

    #[test]
    fn test_explicit_range() {
        assert_eq!(
            ranges("bytes=0-499", 1000),
            vec![ByteRange {
                start: 0,
                length: 500
            }]
        );
    }

    #[test]
    fn test_explicit_range_end_clamped() {
        assert_eq!(
            ranges("bytes=500-1999", 1000),
            vec![ByteRange {
                start: 500,
                length: 500
            }]
        );
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(
            ranges("bytes=-100", 1000),
            vec![ByteRange {
                start: 900,
                length: 100
            }]
        );
    }

    #[test]
    fn test_suffix_longer_than_resource_clamps_to_whole() {
        assert_eq!(
            ranges("bytes=-1500", 1000),
            vec![ByteRange {
                start: 0,
                length: 1000
            }]
        );
    }

    #[test]
    fn test_prefix_range() {
        assert_eq!(
            ranges("bytes=500-", 1000),
            vec![ByteRange {
                start: 500,
                length: 500
            }]
        );
    }

    #[test]
    fn test_multiple_ranges_keep_header_order() {
        assert_eq!(
            ranges("bytes=0-99, 200-299", 1000),
            vec![
                ByteRange {
                    start: 0,
                    length: 100
                },
                ByteRange {
                    start: 200,
                    length: 100
                }
            ]
        );
    }

    #[test]
    fn test_prefix_past_end_is_unsatisfiable() {
        assert_eq!(
            parse_range_header("bytes=1500-", 1000),
            Ok(RangeSet::Unsatisfiable)
        );
    }

    #[test]
    fn test_explicit_past_end_is_unsatisfiable() {
        assert_eq!(
            parse_range_header("bytes=1500-2000", 1000),
            Ok(RangeSet::Unsatisfiable)
        );
    }

    #[test]
    fn test_zero_length_suffix_is_unsatisfiable() {
        assert_eq!(
            parse_range_header("bytes=-0", 1000),
            Ok(RangeSet::Unsatisfiable)
        );
    }

    #[test]
    fn test_one_overlapping_spec_rescues_the_set() {
        assert_eq!(
            ranges("bytes=1500-,0-99", 1000),
            vec![ByteRange {
                start: 0,
                length: 100
            }]
        );
    }

    #[test]
    fn test_only_empty_specs_means_full_body() {
        assert_eq!(
            parse_range_header("bytes=", 1000),
            Ok(RangeSet::Ranges(vec![]))
        );
        assert_eq!(
            parse_range_header("bytes=,,", 1000),
            Ok(RangeSet::Ranges(vec![]))
        );
    }

    #[test]
    fn test_empty_resource_never_satisfies_a_range() {
        assert_eq!(
            parse_range_header("bytes=0-", 0),
            Ok(RangeSet::Unsatisfiable)
        );
        assert_eq!(
            parse_range_header("bytes=-100", 0),
            Ok(RangeSet::Unsatisfiable)
        );
        assert_eq!(
            parse_range_header("bytes=0-0", 0),
            Ok(RangeSet::Unsatisfiable)
        );
    }

    #[test]
    fn test_non_bytes_unit_rejected() {
        let error = parse_range_header("items=0-10", 1000).unwrap_err();
        assert!(matches!(error, RangeError::UnsupportedUnit { .. }));
        assert_eq!(error.resource_size(), 1000);
    }

    #[test]
    fn test_malformed_specs_rejected() {
        for header in ["bytes=abc-", "bytes=-", "bytes=5", "bytes=1-2-3"] {
            let error = parse_range_header(header, 1000).unwrap_err();
            assert!(
                matches!(error, RangeError::MalformedSpec { .. }),
                "expected malformed error for {header:?}, got {error:?}"
            );
        }
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert_eq!(
            parse_range_header("bytes=10-5", 1000),
            Err(RangeError::StartExceedsEnd {
                start: 10,
                end: 5,
                resource_size: 1000
            })
        );
    }

    #[test]
    fn test_total_length_sums_ranges() {
        let set = ranges("bytes=0-99,200-299,-50", 1000);
        assert_eq!(total_length(&set), 250);
    }

    proptest! {
        #[test]
        fn parsed_ranges_stay_in_bounds(
            header in "bytes=[-0-9,]{0,32}",
            size in 0u64..100_000,
        ) {
            if let Ok(RangeSet::Ranges(ranges)) = parse_range_header(&header, size) {
                for range in ranges {
                    prop_assert!(range.length >= 1);
                    prop_assert!(range.start + range.length <= size);
                }
            }
        }
    }
}
