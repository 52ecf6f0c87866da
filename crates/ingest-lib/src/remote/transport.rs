//! Request/response transport used by the remote client
//!
//! The transport never interprets status codes. It reports what happened on
//! the wire: a response, a transport failure, or (when the body could not be
//! read after the headers arrived) both.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Transport-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device has no usable network path to the service
    #[error("no connectivity: {0}")]
    NoConnectivity(String),

    /// The request did not complete within the transport's deadline
    #[error("request timed out: {0}")]
    TimedOut(String),

    /// Any other failure
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_no_connectivity(&self) -> bool {
        matches!(self, TransportError::NoConnectivity(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// JSON-encoded on the wire
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn post(url: Url, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Response with a JSON body
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Body parsed as JSON, if it is JSON
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Everything the transport observed for one request
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub response: Option<HttpResponse>,
    pub error: Option<TransportError>,
}

impl Exchange {
    pub fn completed(response: HttpResponse) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    /// Headers arrived but the exchange still failed (e.g. body read error)
    pub fn partial(response: HttpResponse, error: TransportError) -> Self {
        Self {
            response: Some(response),
            error: Some(error),
        }
    }
}

/// Trait for request/response transports
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request. Never retries.
    async fn execute(&self, request: HttpRequest) -> Exchange;
}

/// Production transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport whose requests expire after `timeout`
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Exchange {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Request failed before a response arrived");
                return Exchange::failed(map_reqwest_error(&e));
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(bytes) => Exchange::completed(HttpResponse::new(status, bytes.to_vec())),
            Err(e) => Exchange::partial(HttpResponse::new(status, Vec::new()), map_reqwest_error(&e)),
        }
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> TransportError {
    // A connect timeout is both; the deadline wins.
    if err.is_timeout() {
        TransportError::TimedOut(err.to_string())
    } else if err.is_connect() {
        TransportError::NoConnectivity(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
