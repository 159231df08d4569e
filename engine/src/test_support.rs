//! Test Doubles
//!
//! A scripted [`ChatTransport`] so account and engine flows can run without
//! a network. Outcomes are queued in order; every request consumes one.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::proxy::Proxy;
use crate::transport::{
    ChatTransport, StreamChunk, TransportError, TransportRequest, TransportResponse,
};

/// A request the mock saw, with the proxy key it was routed through
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// The request as handed to the transport
    pub request: TransportRequest,
    /// Key of the proxy in the path, if any
    pub proxy_key: Option<String>,
}

/// One scripted outcome
enum MockOutcome {
    /// Answer a buffered request
    Respond(TransportResponse),
    /// Fail either request kind
    Fail(TransportError),
    /// Answer a streaming request with these chunks, then close
    Stream(Vec<StreamChunk>),
}

/// Scripted transport double
pub struct MockTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    outcomes: Mutex<VecDeque<MockOutcome>>,
}

impl MockTransport {
    /// Create a mock with an empty script
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a buffered response
    pub fn push_response(&self, status: u16, body: &str, cookies: &[(&str, &str)]) {
        let cookies: HashMap<String, String> = cookies
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        self.outcomes
            .lock()
            .push_back(MockOutcome::Respond(TransportResponse {
                status,
                body: body.to_string(),
                cookies,
            }));
    }

    /// Queue a failure for the next request of either kind
    pub fn push_error(&self, error: TransportError) {
        self.outcomes.lock().push_back(MockOutcome::Fail(error));
    }

    /// Queue a streaming response delivered as the given chunks
    pub fn push_stream(&self, chunks: Vec<StreamChunk>) {
        self.outcomes.lock().push_back(MockOutcome::Stream(chunks));
    }

    /// Everything the mock has been asked to send
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, request: &TransportRequest, proxy: Option<&Proxy>) {
        self.requests.lock().push(RecordedRequest {
            request: request.clone(),
            proxy_key: proxy.map(Proxy::key),
        });
    }

    fn pop(&self) -> MockOutcome {
        self.outcomes
            .lock()
            .pop_front()
            .expect("mock transport ran out of scripted outcomes")
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn request(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<TransportResponse, TransportError> {
        self.record(&request, proxy);
        match self.pop() {
            MockOutcome::Respond(response) => Ok(response),
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Stream(_) => panic!("buffered request consumed a streaming outcome"),
        }
    }

    async fn request_streaming(
        &self,
        request: TransportRequest,
        proxy: Option<&Proxy>,
    ) -> Result<mpsc::Receiver<StreamChunk>, TransportError> {
        self.record(&request, proxy);
        match self.pop() {
            MockOutcome::Stream(chunks) => {
                let (tx, rx) = mpsc::channel(chunks.len().max(1));
                for chunk in chunks {
                    tx.try_send(chunk)
                        .expect("mock stream exceeded channel capacity");
                }
                Ok(rx)
            }
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Respond(_) => panic!("streaming request consumed a buffered outcome"),
        }
    }
}
