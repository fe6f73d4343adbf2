// crates/flag-harness-client/src/service.rs
// ============================================================================
// Module: Test Service Client
// Description: HTTP client for an SDK test service.
// Purpose: Query service capabilities and create SDK client instances.
// Dependencies: reqwest, serde, serde_json, tokio, url, flag-harness-core
// ============================================================================

//! ## Overview
//! A test service wraps one SDK-under-test behind a small HTTP protocol:
//! `GET /` reports the service name and capabilities, `POST /` creates an SDK
//! instance and answers with its `Location`, and commands are posted to that
//! location. [`TestServiceClient`] speaks the service side of that protocol and
//! hands out one [`SdkClientHandle`] per created instance.
//!
//! Security posture: service responses are untrusted; bodies are read under a
//! hard size limit and every non-success status fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use flag_harness_core::HarnessLogEvent;
use flag_harness_core::NoopLogSink;
use flag_harness_core::SharedLogSink;
use reqwest::Client;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use crate::configurer::ConfigurerChain;
use crate::configurer::validate_params;
use crate::error::ClientError;
use crate::handle::SdkClientHandle;
use crate::params::SdkConfigParams;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum response body accepted from a test service.
pub const MAX_SERVICE_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Delay between readiness probes.
const READINESS_INTERVAL: Duration = Duration::from_millis(100);

/// Log component name.
pub(crate) const COMPONENT: &str = "client";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Test service client configuration.
#[derive(Clone)]
pub struct TestServiceConfig {
    /// Service base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum response body size.
    pub max_response_bytes: usize,
    /// Log sink for client activity.
    pub log: SharedLogSink,
}

impl TestServiceConfig {
    /// Builds a configuration with default limits and no logging.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            max_response_bytes: MAX_SERVICE_RESPONSE_BYTES,
            log: Arc::new(NoopLogSink),
        }
    }
}

/// Service identity and declared capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Service name.
    #[serde(default)]
    pub name: String,
    /// Version of the SDK under test.
    #[serde(default)]
    pub client_version: Option<String>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ServiceStatus {
    /// Returns true when the service declares `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|declared| declared == capability)
    }
}

/// Create-instance request body.
#[derive(Serialize)]
struct CreateInstanceRequest<'a> {
    /// Instance tag used in service logs.
    tag: &'a str,
    /// SDK configuration.
    configuration: &'a SdkConfigParams,
}

/// Response read under the size limit.
pub(crate) struct ServiceResponse {
    /// HTTP status.
    pub(crate) status: StatusCode,
    /// Response headers.
    pub(crate) headers: HeaderMap,
    /// Response body.
    pub(crate) body: Vec<u8>,
}

impl ServiceResponse {
    /// Fails unless the status is a success.
    pub(crate) fn require_success(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(ClientError::Status {
            status: self.status.as_u16(),
            body: String::from_utf8_lossy(&self.body).trim().to_string(),
        })
    }
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Shared HTTP transport for the service and its instances.
#[derive(Clone)]
pub(crate) struct ServiceTransport {
    /// HTTP client without redirects.
    http: Client,
    /// Maximum response body size.
    max_response_bytes: usize,
    /// Log sink.
    pub(crate) log: SharedLogSink,
}

impl ServiceTransport {
    /// Sends one request and reads the whole response.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<ServiceResponse, ClientError> {
        let mut request = self.http.request(method, url.clone());
        if let Some(body) = body {
            let payload = serde_json::to_vec(body)
                .map_err(|err| ClientError::Json(format!("request serialization failed: {err}")))?;
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            request = request.headers(headers).body(payload);
        }
        let response =
            request.send().await.map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = read_response_body_with_limit(response, self.max_response_bytes).await?;
        Ok(ServiceResponse {
            status,
            headers,
            body,
        })
    }

    /// Issues a best-effort `DELETE` without reading the response.
    pub(crate) fn delete_detached(&self, url: Url) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let http = self.http.clone();
        runtime.spawn(async move {
            let _ = http.delete(url).send().await;
        });
    }
}

/// Reads an HTTP response body while enforcing a hard byte limit.
///
/// # Errors
///
/// Returns [`ClientError::ResponseTooLarge`] once the body passes `limit`.
async fn read_response_body_with_limit(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    let mut total: usize = 0;
    while let Some(chunk) =
        response.chunk().await.map_err(|err| ClientError::Transport(err.to_string()))?
    {
        let next_total = total.checked_add(chunk.len()).ok_or(ClientError::ResponseTooLarge {
            actual: usize::MAX,
            limit,
        })?;
        if next_total > limit {
            return Err(ClientError::ResponseTooLarge {
                actual: next_total,
                limit,
            });
        }
        body.extend_from_slice(&chunk);
        total = next_total;
    }
    Ok(body)
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Client for one SDK test service.
#[derive(Clone)]
pub struct TestServiceClient {
    /// Service base URL.
    base_url: Url,
    /// Shared transport.
    transport: ServiceTransport,
    /// Status fetched on first use.
    status: Arc<OnceCell<ServiceStatus>>,
}

impl TestServiceClient {
    /// Builds a client; no request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for an invalid base URL or HTTP client.
    pub fn new(config: TestServiceConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url).map_err(|err| {
            ClientError::Config(format!("invalid test service url {}: {err}", config.base_url))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "test service url must be http or https: {base_url}"
            )));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self {
            base_url,
            transport: ServiceTransport {
                http,
                max_response_bytes: config.max_response_bytes,
                log: config.log,
            },
            status: Arc::new(OnceCell::new()),
        })
    }

    /// Returns the service base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches the service status without caching it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails or the body is invalid.
    pub async fn fetch_status(&self) -> Result<ServiceStatus, ClientError> {
        let response =
            self.transport.send(Method::GET, &self.base_url, None).await?.require_success()?;
        serde_json::from_slice(&response.body)
            .map_err(|err| ClientError::Protocol(format!("invalid service status: {err}")))
    }

    /// Returns the service status, fetching it once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the first fetch fails.
    pub async fn status(&self) -> Result<&ServiceStatus, ClientError> {
        self.status.get_or_try_init(|| self.fetch_status()).await
    }

    /// Polls the service until it answers its status request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] when the service is not ready in time.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<&ServiceStatus, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.status().await {
                Ok(status) => {
                    self.transport.log.record(
                        &HarnessLogEvent::new("service_ready", COMPONENT, "test service is ready")
                            .scope(self.base_url.as_str())
                            .field("name", status.name.clone())
                            .field("capabilities", status.capabilities.clone()),
                    );
                    return Ok(status);
                }
                Err(err) if matches!(err, ClientError::Transport(_) | ClientError::Status { .. }) => {
                    if tokio::time::Instant::now() + READINESS_INTERVAL > deadline {
                        return Err(ClientError::Timeout {
                            what: format!("test service at {} ({err})", self.base_url),
                            waited: timeout,
                        });
                    }
                    tokio::time::sleep(READINESS_INTERVAL).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Builds a configurer chain and creates an SDK instance from it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the chain is invalid or creation fails.
    pub async fn create_client_from(
        &self,
        tag: &str,
        chain: &ConfigurerChain,
    ) -> Result<SdkClientHandle, ClientError> {
        let params = chain.build()?;
        self.create_client(tag, &params).await
    }

    /// Creates an SDK instance.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] for an unusable record,
    /// [`ClientError::Status`] when the service rejects it, and
    /// [`ClientError::Protocol`] when the service omits the instance location.
    pub async fn create_client(
        &self,
        tag: &str,
        params: &SdkConfigParams,
    ) -> Result<SdkClientHandle, ClientError> {
        validate_params(params)?;
        let capabilities = self.status().await?.capabilities.clone();
        let request = serde_json::to_value(CreateInstanceRequest {
            tag,
            configuration: params,
        })
        .map_err(|err| ClientError::Json(format!("create request serialization failed: {err}")))?;
        let response = self
            .transport
            .send(Method::POST, &self.base_url, Some(&request))
            .await?
            .require_success()?;
        if response.status != StatusCode::CREATED {
            return Err(ClientError::Protocol(format!(
                "create instance returned {} instead of 201",
                response.status.as_u16()
            )));
        }
        let location = response
            .headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ClientError::Protocol("create instance response has no Location".to_string())
            })?;
        let instance_url = self.base_url.join(location).map_err(|err| {
            ClientError::Protocol(format!("invalid instance location {location}: {err}"))
        })?;
        self.transport.log.record(
            &HarnessLogEvent::new("client_create", COMPONENT, "sdk client created")
                .scope(tag)
                .field("location", instance_url.as_str()),
        );
        Ok(SdkClientHandle::new(self.transport.clone(), instance_url, tag, capabilities))
    }
}
