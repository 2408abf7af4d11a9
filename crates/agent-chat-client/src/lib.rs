//! HTTP client for agent chat backends.
//!
//! Provides:
//! - `HttpBackend` - Session service and live stream over HTTP
//! - `SseParser` - Incremental decoder for the live event stream

pub mod error;
pub mod http;
pub mod sse;

pub use error::ClientError;
pub use http::HttpBackend;
pub use sse::SseParser;
