//! Millrace HTTP server
//!
//! Wires the content deliverer and request runtime into an axum
//! application: a health endpoint plus a fallback route that serves the
//! content root with byte-range and conditional-request support.

pub mod handlers;
pub mod server;

pub use server::{AppState, router, run_server};
