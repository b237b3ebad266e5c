//! Millrace Core - Static-content delivery and request runtime
//!
//! This crate provides the building blocks for a conditional-request-aware
//! static file server: byte-range parsing with multipart framing, the
//! RFC 7232 precondition ladder, a streaming content deliverer, and a
//! concurrency-bounded request runtime with lifecycle hooks.

pub mod config;
pub mod delivery;
pub mod runtime;
pub mod source;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::MillraceConfig;
pub use delivery::{ContentDeliverer, DeliveryError};
pub use runtime::{ConnectionContext, HttpError, Runtime, RuntimeError};
pub use source::{ContentSource, FsContentSource};

/// Core errors that can bubble up from any Millrace subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MillraceError {
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MillraceError {
    /// Returns a user-friendly error message suitable for display.
    ///
    /// Paths and I/O detail stay out of it; those belong in the log.
    pub fn user_message(&self) -> String {
        match self {
            MillraceError::Delivery(e) => match e {
                DeliveryError::NotFound { .. } => "Requested content not found".to_string(),
                DeliveryError::Filesystem { .. } => "Storage error occurred".to_string(),
                DeliveryError::Range(_) => "Requested range not satisfiable".to_string(),
            },
            MillraceError::Runtime(RuntimeError::ShuttingDown) => {
                "Server is shutting down".to_string()
            }
            MillraceError::Runtime(_) => "Request processing error occurred".to_string(),
            MillraceError::Configuration { reason } => format!("Configuration error: {reason}"),
            MillraceError::Io(_) => "File system error occurred".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MillraceError>;
