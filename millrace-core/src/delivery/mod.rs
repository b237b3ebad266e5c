//! Static-content delivery with conditional-request and byte-range support.
//!
//! `ContentDeliverer` turns a request plus a resolved file path into a
//! streaming response: it stats and opens the resource, stamps validators,
//! runs the precondition ladder, parses the `Range` header, and picks
//! between full-body, single-range, and `multipart/byteranges` modes. Body
//! bytes are produced lazily in fixed-size chunks so memory use stays flat
//! regardless of resource size.

pub mod conditional;
mod multipart;
pub mod range;

use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, stream};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub use conditional::{EntityTag, PreconditionOutcome, evaluate_preconditions};
pub use range::{ByteRange, RangeError, RangeSet, parse_range_header};

use self::multipart::MultipartFraming;
use crate::source::{ContentReader, ContentSource};

/// Fixed read size for full and ranged streaming.
///
/// Bounds per-iteration memory; a chunk is read, handed to the transport,
/// and only then is the next one pulled.
const READ_CHUNK_SIZE: usize = 8192;

/// Failures the deliverer reports to its caller.
///
/// `NotFound` is recoverable and conventionally mapped to 404 by the
/// handler. `Filesystem` is unexpected and fatal; the path stays in the
/// log, never in a client-visible message. `Range` is a protocol failure
/// answered with a structured 416.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Content not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Filesystem failure on {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Streams files over HTTP with ETag/Last-Modified validation and RFC 7233
/// byte ranges.
///
/// Holds no per-request state: metadata is stat'd fresh every call and
/// each response owns its reader. The multipart boundary is generated once
/// per instance and is read-only afterwards.
pub struct ContentDeliverer {
    source: Arc<dyn ContentSource>,
    boundary: String,
}

impl ContentDeliverer {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            boundary: multipart::generate_boundary(),
        }
    }

    /// Produces the response for `request` addressing the resource at
    /// `path`.
    ///
    /// Precondition short-circuits (304/412) and unsatisfiable ranges
    /// (416) come back as `Ok` responses; only the not-found, filesystem,
    /// and malformed-range classes are `Err`.
    pub async fn deliver(
        &self,
        request: &Request<()>,
        path: &Path,
    ) -> Result<Response, DeliveryError> {
        let metadata = match self.source.stat(path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(DeliveryError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "stat failed");
                return Err(DeliveryError::Filesystem {
                    path: path.to_path_buf(),
                    source: error,
                });
            }
        };
        if metadata.is_dir {
            return Err(DeliveryError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let reader = match self.source.open(path).await {
            Ok(reader) => reader,
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "open failed");
                return Err(DeliveryError::Filesystem {
                    path: path.to_path_buf(),
                    source: error,
                });
            }
        };

        // Validators are stamped before the precondition ladder runs, so
        // short-circuit responses carry them too.
        let resource_tag = EntityTag::for_resource(path, &metadata);
        let mut headers = HeaderMap::new();
        headers.insert(header::ETAG, ascii_header(&resource_tag.to_string()));
        if let Some(modified) = metadata.modified {
            headers.insert(
                header::LAST_MODIFIED,
                ascii_header(&conditional::format_http_date(modified)),
            );
        }

        let honor_range = match evaluate_preconditions(
            request.method(),
            request.headers(),
            &resource_tag,
            metadata.modified,
        ) {
            PreconditionOutcome::PreconditionFailed => {
                return Ok(respond(
                    StatusCode::PRECONDITION_FAILED,
                    headers,
                    Body::empty(),
                ));
            }
            PreconditionOutcome::NotModified => {
                strip_content_headers(&mut headers);
                return Ok(respond(StatusCode::NOT_MODIFIED, headers, Body::empty()));
            }
            PreconditionOutcome::Proceed { honor_range } => honor_range,
        };

        let content_type = mime_guess::from_path(path).first_or_octet_stream();

        let range_header = if honor_range {
            request
                .headers()
                .get(header::RANGE)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };

        let mut ranges = match parse_range_header(&range_header, metadata.size)? {
            RangeSet::Ranges(ranges) => ranges,
            // Some clients send Range unconditionally; an empty file has
            // nothing to satisfy it with but should not be punished.
            RangeSet::Unsatisfiable if metadata.size == 0 => Vec::new(),
            RangeSet::Unsatisfiable => {
                headers.insert(
                    header::CONTENT_RANGE,
                    ascii_header(&format!("bytes */{}", metadata.size)),
                );
                return Ok(respond(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    headers,
                    Body::empty(),
                ));
            }
        };

        if range::total_length(&ranges) > metadata.size {
            tracing::debug!(
                ranges = ranges.len(),
                size = metadata.size,
                "range set exceeds resource size, serving full body"
            );
            ranges.clear();
        }

        let head_only = *request.method() == Method::HEAD;
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let response = if ranges.is_empty() {
            headers.insert(header::CONTENT_TYPE, ascii_header(content_type.as_ref()));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.size));

            let body = if head_only {
                Body::empty()
            } else {
                let whole = ByteRange {
                    start: 0,
                    length: metadata.size,
                };
                Body::from_stream(slice_stream(reader, whole))
            };
            respond(StatusCode::OK, headers, body)
        } else if ranges.len() == 1 {
            let range = ranges[0];
            headers.insert(header::CONTENT_TYPE, ascii_header(content_type.as_ref()));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.length));
            headers.insert(
                header::CONTENT_RANGE,
                ascii_header(&format!(
                    "bytes {}-{}/{}",
                    range.start,
                    range.end(),
                    metadata.size
                )),
            );

            let body = if head_only {
                Body::empty()
            } else {
                Body::from_stream(slice_stream(reader, range))
            };
            respond(StatusCode::PARTIAL_CONTENT, headers, body)
        } else {
            let framing = MultipartFraming::new(
                self.boundary.clone(),
                content_type.to_string(),
                metadata.size,
            );
            headers.insert(
                header::CONTENT_TYPE,
                ascii_header(&framing.response_content_type()),
            );
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from(framing.content_length(&ranges)),
            );

            let body = if head_only {
                Body::empty()
            } else {
                Body::from_stream(multipart_stream(reader, framing, ranges))
            };
            respond(StatusCode::PARTIAL_CONTENT, headers, body)
        };

        Ok(response)
    }
}

/// Streams exactly one byte slice in `READ_CHUNK_SIZE` reads.
///
/// Seeks once on the first pull, then reads until the slice is exhausted.
/// A premature EOF (resource shrank under us) ends the stream early, the
/// same way the underlying read would report it.
fn slice_stream(
    reader: Box<dyn ContentReader>,
    range: ByteRange,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
    struct SliceState {
        reader: Box<dyn ContentReader>,
        pending_seek: Option<u64>,
        remaining: u64,
    }

    stream::try_unfold(
        SliceState {
            reader,
            pending_seek: Some(range.start),
            remaining: range.length,
        },
        |mut state| async move {
            if state.remaining == 0 {
                return Ok(None);
            }
            if let Some(offset) = state.pending_seek.take() {
                state.reader.seek(SeekFrom::Start(offset)).await?;
            }

            let chunk_len = state.remaining.min(READ_CHUNK_SIZE as u64) as usize;
            let mut buffer = vec![0u8; chunk_len];
            let read = state.reader.read(&mut buffer).await?;
            if read == 0 {
                return Ok(None);
            }

            buffer.truncate(read);
            state.remaining -= read as u64;
            Ok(Some((Bytes::from(buffer), state)))
        },
    )
}

/// Streams a `multipart/byteranges` body in lock-step with the framing
/// that sized it.
///
/// Per part: one header chunk, the part's byte slice in bounded reads,
/// then the part trailer; a closing delimiter chunk ends the sequence.
/// Unlike plain slices, a short read here is an error: the advertised
/// `Content-Length` was computed from the framing and truncation would
/// corrupt it silently.
fn multipart_stream(
    reader: Box<dyn ContentReader>,
    framing: MultipartFraming,
    ranges: Vec<ByteRange>,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
    #[derive(Clone, Copy)]
    enum Phase {
        NextPart,
        Part { remaining: u64 },
        Trailer,
        Closing,
        Done,
    }

    struct MultipartState {
        reader: Box<dyn ContentReader>,
        framing: MultipartFraming,
        parts: VecDeque<ByteRange>,
        phase: Phase,
    }

    stream::try_unfold(
        MultipartState {
            reader,
            framing,
            parts: ranges.into(),
            phase: Phase::NextPart,
        },
        |mut state| async move {
            loop {
                match state.phase {
                    Phase::NextPart => match state.parts.pop_front() {
                        Some(range) => {
                            let part_header = state.framing.part_header(&range);
                            state.reader.seek(SeekFrom::Start(range.start)).await?;
                            state.phase = Phase::Part {
                                remaining: range.length,
                            };
                            return Ok(Some((Bytes::from(part_header), state)));
                        }
                        None => state.phase = Phase::Closing,
                    },
                    Phase::Part { remaining } => {
                        if remaining == 0 {
                            state.phase = Phase::Trailer;
                            continue;
                        }
                        let chunk_len = remaining.min(READ_CHUNK_SIZE as u64) as usize;
                        let mut buffer = vec![0u8; chunk_len];
                        let read = state.reader.read(&mut buffer).await?;
                        if read == 0 {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "resource ended before the advertised range",
                            ));
                        }
                        buffer.truncate(read);
                        state.phase = Phase::Part {
                            remaining: remaining - read as u64,
                        };
                        return Ok(Some((Bytes::from(buffer), state)));
                    }
                    Phase::Trailer => {
                        state.phase = Phase::NextPart;
                        return Ok(Some((
                            Bytes::from_static(multipart::PART_TRAILER.as_bytes()),
                            state,
                        )));
                    }
                    Phase::Closing => {
                        let closing = state.framing.closing_delimiter();
                        state.phase = Phase::Done;
                        return Ok(Some((Bytes::from(closing), state)));
                    }
                    Phase::Done => return Ok(None),
                }
            }
        },
    )
}

/// Headers built here are ASCII by construction; the fallback only guards
/// against programming mistakes, not client input.
fn ascii_header(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// 304 responses drop content headers. Last-Modified goes too because the
/// entity tag is always present and is the stronger validator.
fn strip_content_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_TYPE);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::LAST_MODIFIED);
}

fn respond(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
