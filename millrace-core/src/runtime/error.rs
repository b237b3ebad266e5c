//! Runtime error taxonomy and the structured HTTP error type.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use thiserror::Error;

use crate::delivery::DeliveryError;

/// An error that already knows its HTTP representation.
///
/// Carries a status code and headers; both survive error recovery. A hook
/// may replace the recovered response wholesale, but the status and
/// headers recorded here are re-applied afterwards so recovery cannot
/// downgrade a deliberate error status.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    headers: HeaderMap,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            message: status.canonical_reason().unwrap_or("error").to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures surfaced by `Runtime::handle`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Handler failure: {0}")]
    Handler(#[from] anyhow::Error),

    #[error("Runtime is shutting down")]
    ShuttingDown,
}

impl From<DeliveryError> for HttpError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::NotFound { .. } => {
                HttpError::new(StatusCode::NOT_FOUND).with_message("content not found")
            }
            // Internal detail stays in the log, never in the response.
            DeliveryError::Filesystem { .. } => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR),
            DeliveryError::Range(range_error) => {
                let content_range = format!("bytes */{}", range_error.resource_size());
                HttpError::new(StatusCode::RANGE_NOT_SATISFIABLE).with_header(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&content_range)
                        .unwrap_or_else(|_| HeaderValue::from_static("bytes */0")),
                )
            }
        }
    }
}

impl From<DeliveryError> for RuntimeError {
    fn from(error: DeliveryError) -> Self {
        RuntimeError::Http(HttpError::from(error))
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use super::*;
    use crate::delivery::range::RangeError;

    #[test]
    fn test_http_error_builder() {
        let error = HttpError::new(StatusCode::IM_A_TEAPOT)
            .with_message("short and stout")
            .with_header(header::RETRY_AFTER, HeaderValue::from_static("120"));

        assert_eq!(error.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(error.message(), "short and stout");
        assert_eq!(error.headers().get(header::RETRY_AFTER).unwrap(), "120");
        assert_eq!(error.to_string(), "418 I'm a teapot: short and stout");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let error = HttpError::from(DeliveryError::NotFound {
            path: PathBuf::from("/srv/missing.txt"),
        });

        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert!(!error.message().contains("/srv"));
    }

    #[test]
    fn test_filesystem_error_is_opaque_500() {
        let error = HttpError::from(DeliveryError::Filesystem {
            path: PathBuf::from("/srv/secret/file.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        });

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message().contains("secret"));
        assert!(!error.message().contains("denied"));
    }

    #[test]
    fn test_range_error_carries_content_range_header() {
        let error = HttpError::from(DeliveryError::Range(RangeError::MalformedSpec {
            spec: "abc".to_string(),
            resource_size: 1000,
        }));

        assert_eq!(error.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            error.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1000"
        );
    }
}
