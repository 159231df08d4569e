//! Transport Traits
//!
//! Trait definitions for the HTTP transport seam. This abstraction keeps the
//! engine core independent of any HTTP client, so tests can drive the whole
//! account and chat flow against a scripted transport.
//!
//! # Design Philosophy
//!
//! The `ChatTransport` trait provides a common interface for:
//! - Buffered requests (account provisioning endpoints)
//! - Streaming requests (the chat endpoint, delivered chunk by chunk)
//!
//! Implementations handle the wire details (TLS, proxies, redirects, etc.)

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::proxy::Proxy;

/// A raw body chunk from a streaming response, or the error that ended it
pub type StreamChunk = Result<Vec<u8>, TransportError>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by the transport layer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The service answered 429
    #[error("service rate limited the request")]
    RateLimited,

    /// A proxied request came back with a status that marks the proxy as
    /// burned (redirect to a block page, 403, 407)
    #[error("proxy rejected with status {status}")]
    ProxyFailure {
        /// The HTTP status that condemned the proxy
        status: u16,
    },

    /// The request never produced a status line
    #[error("connection failed: {message}")]
    Connection {
        /// Description of the underlying failure
        message: String,
        /// Whether the request was routed through a proxy
        via_proxy: bool,
    },

    /// Any other non-success status
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status received
        status: u16,
    },

    /// A proxied client could not be constructed for this entry
    #[error("invalid proxy {key}: {message}")]
    InvalidProxy {
        /// Key of the offending proxy
        key: String,
        /// Description of the construction failure
        message: String,
    },
}

impl TransportError {
    /// Whether this failure condemns the proxy it travelled through.
    ///
    /// Rate limits and unexpected statuses reached the service, so the proxy
    /// itself is fine. Connection failures only count when a proxy was in
    /// the path.
    #[must_use]
    pub fn is_proxy_attributable(&self) -> bool {
        match self {
            Self::ProxyFailure { .. } | Self::InvalidProxy { .. } => true,
            Self::Connection { via_proxy, .. } => *via_proxy,
            Self::RateLimited | Self::UnexpectedStatus { .. } => false,
        }
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// HTTP method for a transport request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
}

/// Body of a transport request
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// No body at all
    Empty,
    /// JSON payload
    Json(serde_json::Value),
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
}

/// A request for the transport to execute
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: RequestBody,
}

impl TransportRequest {
    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Create a POST request with an empty body
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body
    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Set a URL-encoded form body
    #[must_use]
    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    /// Look up a header by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response from the transport
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
    /// Cookies set by the response (name to value, attributes stripped)
    pub cookies: HashMap<String, String>,
}

impl TransportResponse {
    /// Look up a cookie set by this response
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Chat service transport trait
///
/// Implement this trait to swap the wire layer (production HTTP, or a
/// scripted double in tests).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Get the transport name (e.g., "http")
    fn name(&self) -> &str;

    /// Execute a request and buffer the whole response.
    ///
    /// A `Some(proxy)` routes the request through that proxy; `None` goes
    /// direct. Only a 200 yields `Ok` - every other outcome maps to a
    /// [`TransportError`] variant.
    async fn request(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<TransportResponse, TransportError>;

    /// Execute a request and stream the response body.
    ///
    /// Returns a channel receiver that yields raw body chunks as they
    /// arrive. The channel closes when the connection does; a mid-stream
    /// failure arrives as a final `Err` chunk. The status line is
    /// classified before this returns, so a non-200 never produces a
    /// receiver.
    async fn request_streaming(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<mpsc::Receiver<StreamChunk>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TransportRequest::post("https://example.net/api/chat")
            .with_header("User-Agent", "test-agent")
            .with_header("Accept", "*/*")
            .with_json(serde_json::json!({"id": "abc"}));

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://example.net/api/chat");
        assert_eq!(request.header("user-agent"), Some("test-agent"));
        assert_eq!(request.header("accept"), Some("*/*"));
        assert_eq!(request.header("Cookie"), None);
        assert!(matches!(request.body, RequestBody::Json(_)));
    }

    #[test]
    fn test_form_builder() {
        let request = TransportRequest::post("https://example.net/login")
            .with_form(vec![("code".to_string(), "ABC123".to_string())]);

        match request.body {
            RequestBody::Form(ref fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0, "code");
                assert_eq!(fields[0].1, "ABC123");
            }
            _ => panic!("Expected form body"),
        }
    }

    #[test]
    fn test_response_cookie_lookup() {
        let mut cookies = HashMap::new();
        cookies.insert("sid".to_string(), "session-value".to_string());

        let response = TransportResponse {
            status: 200,
            body: String::new(),
            cookies,
        };

        assert_eq!(response.cookie("sid"), Some("session-value"));
        assert_eq!(response.cookie("acc_count"), None);
    }

    #[test]
    fn test_proxy_attribution() {
        assert!(TransportError::ProxyFailure { status: 302 }.is_proxy_attributable());
        assert!(TransportError::InvalidProxy {
            key: "10.0.0.1:8080".to_string(),
            message: "bad scheme".to_string(),
        }
        .is_proxy_attributable());
        assert!(TransportError::Connection {
            message: "timed out".to_string(),
            via_proxy: true,
        }
        .is_proxy_attributable());

        assert!(!TransportError::Connection {
            message: "timed out".to_string(),
            via_proxy: false,
        }
        .is_proxy_attributable());
        assert!(!TransportError::RateLimited.is_proxy_attributable());
        assert!(!TransportError::UnexpectedStatus { status: 500 }.is_proxy_attributable());
    }
}
