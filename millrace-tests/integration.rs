//! Integration tests for Millrace
//!
//! These tests exercise component interactions end to end: range and
//! conditional delivery against real files, multipart framing under
//! randomized inputs, runtime concurrency limits, and the full server
//! routing stack.

#[path = "integration/delivery_ranges.rs"]
mod delivery_ranges;

#[path = "integration/delivery_conditional.rs"]
mod delivery_conditional;

#[path = "integration/multipart_content_length.rs"]
mod multipart_content_length;

#[path = "integration/runtime_concurrency.rs"]
mod runtime_concurrency;

#[path = "integration/server_routes.rs"]
mod server_routes;
