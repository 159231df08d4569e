//! HTTP Transport Layer
//!
//! This module provides abstracted access to the remote chat service through
//! a common trait interface, so the engine core never touches HTTP directly.
//!
//! # Available Transports
//!
//! - **HttpTransport**: reqwest-based client with per-proxy client caching
//!   (default)
//!
//! # Usage
//!
//! ```ignore
//! use skyway_engine::transport::{ChatTransport, HttpTransport, TransportRequest};
//!
//! let transport = HttpTransport::from_config(&config);
//! let request = TransportRequest::post(config.url("/api/access-code"));
//! let response = transport.request(request, None).await?;
//! ```

mod http;
mod traits;

pub use http::HttpTransport;
pub use traits::{
    ChatTransport, Method, RequestBody, StreamChunk, TransportError, TransportRequest,
    TransportResponse,
};
