//! Mock transport for testing.
//!
//! Replays scripted exchanges in order and records every request it sees.

use super::transport::{Exchange, HttpRequest, HttpResponse, HttpTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockTransportInner {
    script: VecDeque<Exchange>,
    requests: Vec<HttpRequest>,
}

/// Scripted transport. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an exchange for the next request
    pub fn push_exchange(&self, exchange: Exchange) {
        self.lock().script.push_back(exchange);
    }

    /// Queue a complete response
    pub fn push_response(&self, response: HttpResponse) {
        self.push_exchange(Exchange::completed(response));
    }

    /// Queue a transport failure
    pub fn push_error(&self, error: TransportError) {
        self.push_exchange(Exchange::failed(error));
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Exchange {
        let mut inner = self.lock();
        inner.requests.push(request);
        inner.script.pop_front().unwrap_or_else(|| {
            Exchange::failed(TransportError::NoConnectivity(
                "no scripted exchange".to_string(),
            ))
        })
    }
}
