//! Client for the remote data point service
//!
//! This module provides:
//! - Token sign-in against `{base}/auth/token`
//! - Authenticated data point upload to `{base}/dataPoints`
//! - A transport seam ([`HttpTransport`]) with a reqwest implementation and a scripted mock
//! - Classification of every outcome into [`ClientError`]

pub mod classify;
pub mod mock;
pub mod transport;

pub use classify::{classify_sign_in, classify_transport_error, classify_upload};
pub use mock::MockTransport;
pub use transport::{
    Exchange, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    TransportError,
};

use crate::error::ClientError;
use crate::models::{is_valid_data_point, AuthToken, DataPoint};
use crate::observability::IngestMetrics;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Configuration for the remote client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service base URL (e.g., "https://ingest.example.org/api")
    pub base_url: String,
    /// Per-request deadline enforced by the transport
    pub request_timeout: Duration,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("ingest-lib/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Stateless mediator between callers and the remote service.
///
/// Cloning is cheap; clones share the transport.
#[derive(Clone)]
pub struct RemoteClient {
    base_url: Url,
    transport: Arc<dyn HttpTransport>,
    runtime: Option<Handle>,
    metrics: Option<IngestMetrics>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Create a client backed by [`ReqwestTransport`]
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(config.request_timeout, &config.user_agent)
            .map_err(ClientError::Other)?;
        Self::with_transport(&config.base_url, Arc::new(transport))
    }

    /// Create a client over any transport
    pub fn with_transport(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ClientError> {
        // Endpoints are appended to the base path, so it must end in '/'
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            base_url: Url::parse(&base)?,
            transport,
            runtime: None,
            metrics: None,
        })
    }

    /// Default runtime for the `spawn_*` methods
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Count upload results in the global metrics
    pub fn with_metrics(mut self, metrics: IngestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    /// Exchange credentials for an auth token
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<AuthToken, ClientError> {
        let url = self.endpoint("auth/token")?;
        let request = HttpRequest::post(
            url,
            json!({
                "username": username,
                "password": password,
            }),
        )
        .header("Accept", "application/json");

        let exchange = self.transport.execute(request).await;
        log_exchange("sign_in", &exchange);

        let result = classify_sign_in(exchange);
        if let Err(e) = &result {
            warn!(username = %username, error = %e, "Sign-in failed");
        }
        result
    }

    /// Returns true iff `sample` serializes to a JSON object
    pub fn validate_sample<T: Serialize + ?Sized>(&self, sample: &T) -> bool {
        is_valid_data_point(sample)
    }

    /// Upload one data point.
    ///
    /// Fails with [`ClientError::InvalidDataPoint`] before any network call if
    /// the sample is not a JSON object.
    pub async fn post_sample<T: Serialize + ?Sized>(
        &self,
        sample: &T,
        token: &AuthToken,
    ) -> Result<(), ClientError> {
        let point = DataPoint::from_serializable(sample).map_err(|e| {
            debug!(error = %e, "Rejecting sample before upload");
            ClientError::InvalidDataPoint
        })?;

        let url = self.endpoint("dataPoints")?;
        let point_id = point.id().map(str::to_string);
        let request = HttpRequest::post(url, point.into_value())
            .header("Authorization", token.header_value())
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");

        let exchange = self.transport.execute(request).await;
        log_exchange("post_sample", &exchange);

        let result = classify_upload(exchange);
        if let Some(metrics) = &self.metrics {
            metrics.record_upload(result.as_ref().err().map(ClientError::kind));
        }
        if let Err(e) = &result {
            warn!(point_id = ?point_id, error = %e, "Data point upload failed");
        }
        result
    }

    fn runtime(&self, handle: Option<Handle>) -> Handle {
        handle
            .or_else(|| self.runtime.clone())
            .unwrap_or_else(Handle::current)
    }

    /// Run [`RemoteClient::sign_in`] as a task.
    ///
    /// Uses `handle`, else the client's configured runtime, else the current
    /// one. Panics if none of these exist.
    pub fn spawn_sign_in(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        handle: Option<Handle>,
    ) -> JoinHandle<Result<AuthToken, ClientError>> {
        let client = self.clone();
        let username = username.into();
        let password = password.into();
        self.runtime(handle)
            .spawn(async move { client.sign_in(&username, &password).await })
    }

    /// Run [`RemoteClient::post_sample`] as a task. Runtime selection as for
    /// [`RemoteClient::spawn_sign_in`].
    pub fn spawn_post_sample<T>(
        &self,
        sample: T,
        token: AuthToken,
        handle: Option<Handle>,
    ) -> JoinHandle<Result<(), ClientError>>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let client = self.clone();
        self.runtime(handle)
            .spawn(async move { client.post_sample(&sample, &token).await })
    }
}

fn log_exchange(operation: &str, exchange: &Exchange) {
    match (&exchange.response, &exchange.error) {
        (Some(response), error) => debug!(
            operation = operation,
            status = response.status,
            body = %response.body_text(),
            error = ?error,
            "Received response"
        ),
        (None, error) => debug!(
            operation = operation,
            error = ?error,
            "No response received"
        ),
    }
}
