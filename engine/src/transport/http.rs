//! HTTP Transport Implementation
//!
//! reqwest-based transport for the remote chat service.
//!
//! # Wire Behavior
//!
//! - Redirects are never followed: the service answers its endpoints with
//!   200, so any redirect on a proxied request means the proxy was served a
//!   block page.
//! - One `reqwest::Client` is built per proxy and cached for the life of
//!   the transport, so connection pools survive across requests.
//! - A single fixed timeout covers each request, including the full
//!   streaming read of a chat response.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::SET_COOKIE;
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{
    ChatTransport, Method, RequestBody, StreamChunk, TransportError, TransportRequest,
    TransportResponse,
};
use crate::config::EngineConfig;
use crate::proxy::Proxy;

/// reqwest-backed transport with per-proxy client caching
pub struct HttpTransport {
    /// Per-request timeout applied to every client
    timeout: std::time::Duration,
    /// Client for direct (unproxied) requests
    direct: reqwest::Client,
    /// Cached clients keyed by proxy `host:port`
    proxied: RwLock<HashMap<String, reqwest::Client>>,
}

impl HttpTransport {
    /// Create a new transport with the given per-request timeout
    #[must_use]
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            timeout,
            direct: reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Failed to create HTTP client"),
            proxied: RwLock::new(HashMap::new()),
        }
    }

    /// Create a transport from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.request_timeout)
    }

    /// Resolve the client for a request, building and caching a proxied
    /// client on first use.
    fn client_for(&self, proxy: Option<&Proxy>) -> Result<reqwest::Client, TransportError> {
        let proxy = match proxy {
            Some(p) => p,
            None => return Ok(self.direct.clone()),
        };

        let key = proxy.key();
        if let Some(client) = self.proxied.read().get(&key) {
            return Ok(client.clone());
        }

        debug!(proxy = %key, "Building proxied HTTP client");
        let client = self.build_proxied(proxy)?;
        self.proxied.write().insert(key, client.clone());
        Ok(client)
    }

    /// Build a client routed through one proxy
    fn build_proxied(&self, proxy: &Proxy) -> Result<reqwest::Client, TransportError> {
        let invalid = |message: String| TransportError::InvalidProxy {
            key: proxy.key(),
            message,
        };

        let mut upstream = reqwest::Proxy::all(proxy.url()).map_err(|e| invalid(e.to_string()))?;
        if let (Some(user), Some(pass)) = (proxy.username.as_deref(), proxy.password.as_deref()) {
            upstream = upstream.basic_auth(user, pass);
        }

        reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .proxy(upstream)
            .build()
            .map_err(|e| invalid(e.to_string()))
    }

    /// Translate a [`TransportRequest`] into a reqwest builder
    fn apply(client: &reqwest::Client, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        }
    }

    /// Send the request and classify the status line
    async fn execute(
        &self,
        request: &TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<reqwest::Response, TransportError> {
        let client = self.client_for(proxy)?;
        let via_proxy = proxy.is_some();

        let response =
            Self::apply(&client, request)
                .send()
                .await
                .map_err(|e| TransportError::Connection {
                    message: e.to_string(),
                    via_proxy,
                })?;

        classify_status(response.status().as_u16(), via_proxy)?;
        Ok(response)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn request(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<TransportResponse, TransportError> {
        let via_proxy = proxy.is_some();
        let response = self.execute(&request, proxy).await?;

        let status = response.status().as_u16();
        let cookies = extract_cookies(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Connection {
                message: e.to_string(),
                via_proxy,
            })?;

        Ok(TransportResponse {
            status,
            body,
            cookies,
        })
    }

    async fn request_streaming(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<mpsc::Receiver<StreamChunk>, TransportError> {
        let via_proxy = proxy.is_some();
        let response = self.execute(&request, proxy).await?;

        let (tx, rx) = mpsc::channel(100);
        let mut stream = response.bytes_stream();

        // Spawn task to relay body chunks; the channel closing is the
        // receiver's signal that the connection closed.
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx.send(Ok(bytes.to_vec())).await.is_err() {
                            // Receiver dropped, stop relaying
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(TransportError::Connection {
                                message: e.to_string(),
                                via_proxy,
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Map an HTTP status to a transport outcome.
///
/// Only 200 is success. A redirect or access-denied status on a proxied
/// request condemns the proxy; the same statuses on a direct request are
/// merely unexpected.
fn classify_status(status: u16, via_proxy: bool) -> Result<(), TransportError> {
    match status {
        200 => Ok(()),
        429 => Err(TransportError::RateLimited),
        301 | 302 | 307 | 308 | 403 | 407 if via_proxy => {
            Err(TransportError::ProxyFailure { status })
        }
        _ => Err(TransportError::UnexpectedStatus { status }),
    }
}

/// Collect `Set-Cookie` headers into a name-to-value map.
///
/// Attributes after the first `;` are dropped; a repeated name keeps the
/// last value, so a refreshed session cookie wins.
fn extract_cookies(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(SET_COOKIE) {
        if let Ok(raw) = value.to_str() {
            let pair = raw.split(';').next().unwrap_or(raw);
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }
    cookies
}
