//! Conditional request evaluation per the `If-*` precedence rules.
//!
//! Evaluates `If-Match`, `If-Unmodified-Since`, `If-None-Match`,
//! `If-Modified-Since`, and `If-Range` against a resource's entity tag and
//! modification time. The ladder is strict: `If-Match` suppresses
//! `If-Unmodified-Since`, `If-None-Match` suppresses `If-Modified-Since`,
//! and `If-Range` only decides whether a `Range` header is honored.

use axum::http::{HeaderMap, HeaderName, Method, header};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

use crate::source::ContentMetadata;

/// An HTTP entity tag, strong (`"v"`) or weak (`W/"v"`).
///
/// Tags are opaque: the quoted value is compared byte-for-byte and never
/// interpreted. Resource tags are always strong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    weak: bool,
    value: String,
}

impl EntityTag {
    /// Parses a single tag token, tolerating missing quotes.
    ///
    /// Client-supplied tags are matched opaquely, so malformed tokens
    /// simply never compare equal to a well-formed resource tag.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.strip_prefix("W/") {
            Some(value) => Self {
                weak: true,
                value: value.to_string(),
            },
            None => Self {
                weak: false,
                value: token.to_string(),
            },
        }
    }

    /// Deterministic strong tag for a resource: identical path, size, and
    /// modification time always hash to the identical tag.
    pub fn for_resource(path: &std::path::Path, metadata: &ContentMetadata) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(metadata.size.to_be_bytes());
        hasher.update(metadata.modified_epoch().to_be_bytes());

        Self {
            weak: false,
            value: format!("\"{}\"", hex::encode(hasher.finalize())),
        }
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Strong comparison: byte-identical values and neither side weak.
    pub fn strong_match(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.value == other.value
    }

    /// Weak comparison: values equal once any `W/` prefix is stripped.
    pub fn weak_match(&self, other: &EntityTag) -> bool {
        self.value == other.value
    }
}

impl std::fmt::Display for EntityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.weak {
            write!(f, "W/{}", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// Result of running the precondition ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionOutcome {
    /// Continue toward body delivery. `honor_range` is false when an
    /// `If-Range` validator failed and the `Range` header must be ignored.
    Proceed { honor_range: bool },
    /// Answer `304 Not Modified` with content headers stripped.
    NotModified,
    /// Answer `412 Precondition Failed`.
    PreconditionFailed,
}

/// Evaluates the conditional request headers in precedence order.
///
/// `modified` is the resource's modification time at second precision;
/// when unknown, date-based conditions cannot trigger.
pub fn evaluate_preconditions(
    method: &Method,
    headers: &HeaderMap,
    resource_tag: &EntityTag,
    modified: Option<DateTime<Utc>>,
) -> PreconditionOutcome {
    let read_only = matches!(*method, Method::GET | Method::HEAD);

    if headers.contains_key(header::IF_MATCH) {
        let matched = tag_tokens(headers, header::IF_MATCH)
            .any(|token| token == "*" || EntityTag::parse(token).strong_match(resource_tag));
        if !matched {
            return PreconditionOutcome::PreconditionFailed;
        }
    } else if let Some(value) = date_header(headers, header::IF_UNMODIFIED_SINCE) {
        if let (Some(date), Some(modified)) = (parse_http_date(value), modified) {
            if date < modified {
                return PreconditionOutcome::PreconditionFailed;
            }
        }
    }

    if headers.contains_key(header::IF_NONE_MATCH) {
        let matched = tag_tokens(headers, header::IF_NONE_MATCH)
            .any(|token| token == "*" || EntityTag::parse(token).weak_match(resource_tag));
        if matched {
            return if read_only {
                PreconditionOutcome::NotModified
            } else {
                PreconditionOutcome::PreconditionFailed
            };
        }
    } else if read_only {
        if let Some(value) = date_header(headers, header::IF_MODIFIED_SINCE) {
            if let (Some(date), Some(modified)) = (parse_http_date(value), modified) {
                if date >= modified {
                    return PreconditionOutcome::NotModified;
                }
            }
        }
    }

    let honor_range = match date_header(headers, header::IF_RANGE) {
        None => true,
        Some(validator) => if_range_honors(validator, resource_tag, modified),
    };
    PreconditionOutcome::Proceed { honor_range }
}

/// Parses an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
///
/// Obsolete RFC 850 and asctime forms do not parse; conditions guarded by
/// them are simply skipped.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Formats a timestamp as an IMF-fixdate for `Last-Modified`.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// True when the `If-Range` validator still identifies the current
/// resource and the requested range may be served.
fn if_range_honors(
    validator: &str,
    resource_tag: &EntityTag,
    modified: Option<DateTime<Utc>>,
) -> bool {
    let validator = validator.trim();
    if validator.starts_with('"') || validator.starts_with("W/") {
        return EntityTag::parse(validator).strong_match(resource_tag);
    }
    match (parse_http_date(validator), modified) {
        (Some(date), Some(modified)) => date == modified,
        _ => false,
    }
}

/// Iterates the trimmed, non-empty tag tokens of every line of a
/// comma-separated list header.
fn tag_tokens(headers: &HeaderMap, name: HeaderName) -> impl Iterator<Item = &str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(',').map(str::trim).filter(|token| !token.is_empty()))
}

fn date_header(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::http::HeaderValue;

    use super::*;

    fn resource_tag() -> EntityTag {
        EntityTag::parse("\"abc123\"")
    }

    fn mtime() -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(1_700_000_000, 0)
    }

    fn headers_with(pairs: &[(HeaderName, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn evaluate(method: Method, pairs: &[(HeaderName, &str)]) -> PreconditionOutcome {
        evaluate_preconditions(&method, &headers_with(pairs), &resource_tag(), mtime())
    }

    #[test]
    fn test_strong_and_weak_matching() {
        let strong = EntityTag::parse("\"v1\"");
        let weak = EntityTag::parse("W/\"v1\"");

        assert!(strong.strong_match(&EntityTag::parse("\"v1\"")));
        assert!(!strong.strong_match(&weak));
        assert!(!weak.strong_match(&weak));
        assert!(weak.is_weak());

        assert!(weak.weak_match(&strong));
        assert!(weak.weak_match(&EntityTag::parse("W/\"v1\"")));
        assert!(!weak.weak_match(&EntityTag::parse("\"v2\"")));
    }

    #[test]
    fn test_resource_tag_is_deterministic_and_strong() {
        let metadata = ContentMetadata {
            size: 42,
            modified: mtime(),
            is_dir: false,
        };
        let first = EntityTag::for_resource(Path::new("/srv/file.bin"), &metadata);
        let second = EntityTag::for_resource(Path::new("/srv/file.bin"), &metadata);

        assert_eq!(first, second);
        assert!(!first.is_weak());
        assert!(first.to_string().starts_with('"'));

        let grown = ContentMetadata {
            size: 43,
            ..metadata
        };
        assert_ne!(
            first,
            EntityTag::for_resource(Path::new("/srv/file.bin"), &grown)
        );
    }

    #[test]
    fn test_http_date_round_trip() {
        let time = mtime().unwrap();
        let formatted = format_http_date(time);
        assert!(formatted.ends_with(" GMT"));
        assert_eq!(parse_http_date(&formatted), Some(time));
    }

    #[test]
    fn test_no_conditions_proceeds_with_range() {
        assert_eq!(
            evaluate(Method::GET, &[]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_match_wildcard_and_exact() {
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MATCH, "*")]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MATCH, "\"other\", \"abc123\"")]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MATCH, "\"other\"")]),
            PreconditionOutcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_match_requires_strong_comparison() {
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MATCH, "W/\"abc123\"")]),
            PreconditionOutcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_unmodified_since_only_when_if_match_absent() {
        let stale = format_http_date(DateTime::from_timestamp(1_600_000_000, 0).unwrap());

        assert_eq!(
            evaluate(Method::GET, &[(header::IF_UNMODIFIED_SINCE, &stale)]),
            PreconditionOutcome::PreconditionFailed
        );
        // A passing If-Match suppresses the stale date entirely.
        assert_eq!(
            evaluate(
                Method::GET,
                &[
                    (header::IF_MATCH, "\"abc123\""),
                    (header::IF_UNMODIFIED_SINCE, &stale),
                ]
            ),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_unmodified_since_current_date_proceeds() {
        let fresh = format_http_date(DateTime::from_timestamp(1_800_000_000, 0).unwrap());
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_UNMODIFIED_SINCE, &fresh)]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_none_match_read_methods_get_304() {
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_NONE_MATCH, "\"abc123\"")]),
            PreconditionOutcome::NotModified
        );
        assert_eq!(
            evaluate(Method::HEAD, &[(header::IF_NONE_MATCH, "*")]),
            PreconditionOutcome::NotModified
        );
    }

    #[test]
    fn test_if_none_match_write_methods_get_412() {
        assert_eq!(
            evaluate(Method::POST, &[(header::IF_NONE_MATCH, "\"abc123\"")]),
            PreconditionOutcome::PreconditionFailed
        );
    }

    #[test]
    fn test_if_none_match_uses_weak_comparison() {
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_NONE_MATCH, "W/\"abc123\"")]),
            PreconditionOutcome::NotModified
        );
    }

    #[test]
    fn test_if_none_match_miss_suppresses_if_modified_since() {
        let current = format_http_date(mtime().unwrap());

        // If-Modified-Since alone would answer 304 here.
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MODIFIED_SINCE, &current)]),
            PreconditionOutcome::NotModified
        );
        // A missing If-None-Match tag wins over the matching date.
        assert_eq!(
            evaluate(
                Method::GET,
                &[
                    (header::IF_NONE_MATCH, "\"other\""),
                    (header::IF_MODIFIED_SINCE, &current),
                ]
            ),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_modified_since_older_resource_proceeds() {
        let before = format_http_date(DateTime::from_timestamp(1_600_000_000, 0).unwrap());
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_MODIFIED_SINCE, &before)]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_modified_since_ignored_for_writes() {
        let current = format_http_date(mtime().unwrap());
        assert_eq!(
            evaluate(Method::POST, &[(header::IF_MODIFIED_SINCE, &current)]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_if_range_entity_tag_forms() {
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, "\"abc123\"")]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
        // Weak validators can never strong-match.
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, "W/\"abc123\"")]),
            PreconditionOutcome::Proceed { honor_range: false }
        );
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, "\"other\"")]),
            PreconditionOutcome::Proceed { honor_range: false }
        );
    }

    #[test]
    fn test_if_range_date_forms() {
        let exact = format_http_date(mtime().unwrap());
        let other = format_http_date(DateTime::from_timestamp(1_600_000_000, 0).unwrap());

        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, &exact)]),
            PreconditionOutcome::Proceed { honor_range: true }
        );
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, &other)]),
            PreconditionOutcome::Proceed { honor_range: false }
        );
        assert_eq!(
            evaluate(Method::GET, &[(header::IF_RANGE, "not a validator")]),
            PreconditionOutcome::Proceed { honor_range: false }
        );
    }

    #[test]
    fn test_unknown_mtime_skips_date_conditions() {
        let date = format_http_date(mtime().unwrap());
        let headers = headers_with(&[(header::IF_MODIFIED_SINCE, &date)]);

        assert_eq!(
            evaluate_preconditions(&Method::GET, &headers, &resource_tag(), None),
            PreconditionOutcome::Proceed { honor_range: true }
        );

        let headers = headers_with(&[(header::IF_UNMODIFIED_SINCE, &date)]);
        assert_eq!(
            evaluate_preconditions(&Method::GET, &headers, &resource_tag(), None),
            PreconditionOutcome::Proceed { honor_range: true }
        );
    }

    #[test]
    fn test_tag_tokens_spans_multiple_header_lines() {
        let mut headers = HeaderMap::new();
        headers.append(header::IF_NONE_MATCH, HeaderValue::from_static("\"a\", \"b\""));
        headers.append(header::IF_NONE_MATCH, HeaderValue::from_static("\"abc123\""));

        assert_eq!(
            evaluate_preconditions(&Method::GET, &headers, &resource_tag(), mtime()),
            PreconditionOutcome::NotModified
        );
    }
}
