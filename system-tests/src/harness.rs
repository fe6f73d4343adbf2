// system-tests/src/harness.rs
// ============================================================================
// Module: Test Harness Scope
// Description: One mock backend plus one test-service client per test.
// Purpose: Hand out wired services, sinks, and SDK clients from configuration.
// Dependencies: flag-harness-client, flag-harness-config, flag-harness-core, flag-harness-mock
// ============================================================================

//! ## Overview
//! A [`TestHarness`] owns everything a conformance test needs for its
//! lifetime: the mock server, the test-service client, credentials, timeouts,
//! and the log sink. Services it creates are bound to fresh endpoints on its
//! server, and SDK clients it starts are tagged uniquely so their logs can be
//! told apart. Dropping the harness cancels open streams and stops the server.
//!
//! The SDK kind table is resolved here: chains for a kind carry that kind's
//! credential and client-side settings, and the request a kind is expected to
//! open (method, path, body, `Authorization`) is built from the same table a
//! test then checks recorded connections against.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use flag_harness_client::ClientError;
use flag_harness_client::Configurer;
use flag_harness_client::ConfigurerChain;
use flag_harness_client::SdkClientHandle;
use flag_harness_client::ServiceStatus;
use flag_harness_client::TestServiceClient;
use flag_harness_client::TestServiceConfig;
use flag_harness_config::HarnessConfig;
use flag_harness_config::TimeoutsConfig;
use flag_harness_core::DataSet;
use flag_harness_core::FlagQuery;
use flag_harness_core::FlagRequestMethod;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::RequestTarget;
use flag_harness_core::SdkKind;
use flag_harness_core::SharedLogSink;
use flag_harness_core::StreamProtocol;
use flag_harness_mock::DataSource;
use flag_harness_mock::Endpoint;
use flag_harness_mock::EndpointHandler;
use flag_harness_mock::EventSink;
use flag_harness_mock::HookCallbackService;
use flag_harness_mock::MockServer;
use flag_harness_mock::MockServerHandle;
use flag_harness_mock::MockServerOptions;
use flag_harness_mock::PollingService;
use flag_harness_mock::RequestRecord;
use flag_harness_mock::StreamingOptions;
use flag_harness_mock::StreamingService;
use serde_json::Value;

use crate::error::HarnessError;

/// Log component name.
const COMPONENT: &str = "harness";

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Per-test scope.
pub struct TestHarness {
    /// Validated configuration.
    config: HarnessConfig,
    /// Shared log sink.
    log: SharedLogSink,
    /// Test-service client.
    service: TestServiceClient,
    /// Tag counter for started clients.
    next_client: AtomicU64,
    /// Mock backend; dropped last so open streams are cancelled after clients.
    server: MockServer,
}

impl TestHarness {
    /// Builds a harness from process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] when configuration or startup fails.
    pub fn from_environment() -> Result<Self, HarnessError> {
        Self::new(HarnessConfig::from_environment()?)
    }

    /// Builds a harness logging to the configured sink.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] when configuration or startup fails.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        let log = config.build_log_sink()?;
        Self::with_log(config, log)
    }

    /// Builds a harness logging to `log`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] when configuration or startup fails.
    pub fn with_log(mut config: HarnessConfig, log: SharedLogSink) -> Result<Self, HarnessError> {
        config.validate()?;
        let server = MockServer::start(MockServerOptions {
            bind_host: config.server.bind_host.clone(),
            max_body_bytes: config.server.max_body_bytes,
            log: log.clone(),
        })?;
        let mut service_config =
            TestServiceConfig::new(config.service.url.clone(), config.service.command_timeout());
        service_config.log = log.clone();
        let service = TestServiceClient::new(service_config)?;
        log.record(
            &HarnessLogEvent::new("harness_start", COMPONENT, "test scope started")
                .field("mock_base_url", server.base_url())
                .field("service_url", config.service.url.as_str()),
        );
        Ok(Self {
            config,
            log,
            service,
            next_client: AtomicU64::new(0),
            server,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the wait timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> &TimeoutsConfig {
        &self.config.timeouts
    }

    /// Returns the log sink.
    #[must_use]
    pub const fn log(&self) -> &SharedLogSink {
        &self.log
    }

    /// Returns the mock server.
    #[must_use]
    pub const fn server(&self) -> &MockServer {
        &self.server
    }

    /// Returns a cloneable mock server handle.
    #[must_use]
    pub fn server_handle(&self) -> MockServerHandle {
        self.server.handle()
    }

    /// Returns the test-service client.
    #[must_use]
    pub const fn service(&self) -> &TestServiceClient {
        &self.service
    }

    /// Returns the default credential for an SDK kind.
    #[must_use]
    pub fn credential(&self, kind: SdkKind) -> &str {
        let credentials = &self.config.credentials;
        match kind {
            SdkKind::Server => &credentials.server_key,
            SdkKind::Mobile => &credentials.mobile_key,
            SdkKind::JsClient => &credentials.client_side_id,
        }
    }

    /// Waits for the test service to answer its status request.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] when the service is not ready in time.
    pub async fn wait_for_service(&self) -> Result<&ServiceStatus, HarnessError> {
        Ok(self.service.wait_until_ready(self.config.service.startup_timeout()).await?)
    }

    /// Registers an arbitrary handler on a fresh endpoint.
    pub fn endpoint<H: EndpointHandler + 'static>(&self, handler: H) -> Endpoint {
        self.server.new_endpoint(handler)
    }

    /// Creates a versioned streaming service on a fresh endpoint.
    pub fn streaming(&self, data: impl Into<DataSet>) -> (StreamingService, Endpoint) {
        self.streaming_with(DataSource::new(data), StreamProtocol::Versioned)
    }

    /// Creates a streaming service over `source` on a fresh endpoint.
    pub fn streaming_with(
        &self,
        source: DataSource,
        protocol: StreamProtocol,
    ) -> (StreamingService, Endpoint) {
        let service = StreamingService::with_source(
            source,
            StreamingOptions {
                protocol,
                log: self.log.clone(),
                ..StreamingOptions::default()
            },
        );
        let endpoint = self.server.new_endpoint(service.clone());
        (service, endpoint)
    }

    /// Creates a polling service over `source` on a fresh endpoint.
    pub fn polling(&self, source: DataSource, protocol: StreamProtocol) -> Endpoint {
        self.server
            .new_endpoint(PollingService::with_source(source, protocol).with_log(self.log.clone()))
    }

    /// Creates an event sink on a fresh endpoint.
    #[must_use]
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(&self.server.handle())
    }

    /// Creates an empty hook callback service.
    #[must_use]
    pub fn hook_service(&self) -> HookCallbackService {
        HookCallbackService::new(self.server.handle())
    }

    /// Starts a chain with the default credential for `kind`.
    #[must_use]
    pub fn base_configurers(&self, kind: SdkKind) -> ConfigurerChain {
        ConfigurerChain::new().with(Configurer::base(self.credential(kind)))
    }

    /// Starts a server-side chain streaming from `endpoint`.
    #[must_use]
    pub fn streaming_configurers(&self, endpoint: &Endpoint) -> ConfigurerChain {
        self.streaming_configurers_for(SdkKind::Server, endpoint, &Value::Null, FlagRequestMethod::Get)
    }

    /// Starts a chain for `kind` streaming from `endpoint`. Client-side kinds
    /// start with `context` and retrieve flags with `method`.
    #[must_use]
    pub fn streaming_configurers_for(
        &self,
        kind: SdkKind,
        endpoint: &Endpoint,
        context: &Value,
        method: FlagRequestMethod,
    ) -> ConfigurerChain {
        let chain = self
            .base_configurers(kind)
            .with(Configurer::streaming(endpoint.base_url()))
            .with(Configurer::start_wait(self.config.timeouts.connection(), false));
        if !kind.is_client_side() {
            return chain;
        }
        chain
            .with(Configurer::client_side(context.clone()))
            .with(Configurer::use_report(method == FlagRequestMethod::Report))
    }

    /// Stream request `kind` is expected to open for `context`.
    #[must_use]
    pub fn expected_stream_request(
        &self,
        kind: SdkKind,
        method: FlagRequestMethod,
        context: &Value,
        basis: Option<&str>,
    ) -> RequestTarget {
        kind.stream_request(StreamProtocol::Versioned, &self.flag_query(kind, method, context, basis))
    }

    /// Poll request `kind` is expected to send for `context`.
    #[must_use]
    pub fn expected_poll_request(
        &self,
        kind: SdkKind,
        method: FlagRequestMethod,
        context: &Value,
        basis: Option<&str>,
    ) -> RequestTarget {
        kind.poll_request(StreamProtocol::Versioned, &self.flag_query(kind, method, context, basis))
    }

    /// Checks a recorded flag request against `expected` and the credential
    /// rule of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Failed`] naming the first mismatch.
    pub fn check_flag_request(
        &self,
        kind: SdkKind,
        request: &RequestRecord,
        expected: &RequestTarget,
    ) -> Result<(), HarnessError> {
        let mismatch = |message: String| HarnessError::Failed {
            what: format!("{kind} flag request {}", request.describe()),
            message,
        };
        if request.method != expected.method.as_str() {
            return Err(mismatch(format!("expected method {}", expected.method.as_str())));
        }
        let target = match &request.query {
            Some(query) => format!("{}?{query}", request.path),
            None => request.path.clone(),
        };
        if target != expected.path {
            return Err(mismatch(format!("expected path {}", expected.path)));
        }
        if let Some(body) = &expected.body {
            let received = request.body_json()?;
            if &received != body {
                return Err(mismatch(format!("expected body {body}, received {received}")));
            }
        }
        match (kind.requires_auth(), request.header("authorization")) {
            (true, Some(value)) if value == self.credential(kind) => Ok(()),
            (true, _) => Err(mismatch("expected the kind's credential in Authorization".to_string())),
            (false, None) => Ok(()),
            (false, Some(_)) => Err(mismatch("unexpected Authorization header".to_string())),
        }
    }

    /// Flag query inputs for `kind` using its default credential.
    fn flag_query<'a>(
        &'a self,
        kind: SdkKind,
        method: FlagRequestMethod,
        context: &'a Value,
        basis: Option<&'a str>,
    ) -> FlagQuery<'a> {
        FlagQuery {
            method,
            env: self.credential(kind),
            context,
            with_reasons: false,
            basis,
        }
    }

    /// Builds the chain and starts an SDK client with a unique tag.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] when the chain is invalid or the
    /// service refuses the instance.
    pub async fn start_client(
        &self,
        chain: &ConfigurerChain,
    ) -> Result<SdkClientHandle, HarnessError> {
        let index = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.start_tagged_client(&format!("client-{index}"), chain).await
    }

    /// Builds the chain and starts an SDK client with `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] when the chain is invalid or the
    /// service refuses the instance.
    pub async fn start_tagged_client(
        &self,
        tag: &str,
        chain: &ConfigurerChain,
    ) -> Result<SdkClientHandle, HarnessError> {
        let params = chain.build()?;
        self.service.create_client(tag, &params).await.map_err(|err| match err {
            ClientError::Status {
                status,
                body,
            } => HarnessError::Failed {
                what: format!("starting sdk client {tag}"),
                message: format!("test service returned {status}: {body}"),
            },
            other => HarnessError::Client(other),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
