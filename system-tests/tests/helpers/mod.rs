// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for conformance system-tests.
// Purpose: Start the reference test service and a harness pointed at it.
// Dependencies: system-tests, flag-harness-config, flag-harness-core
// ============================================================================

//! ## Overview
//! Every conformance test runs inside a [`TestScope`]: a reference test
//! service on a loopback port plus a [`TestHarness`] whose mock backend and
//! test-service client are wired to it. Logs go to an in-memory sink so tests
//! can assert on them; `FLAG_HARNESS_TIMEOUT_MS` still raises every wait.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod stub_sdk;

use std::sync::Arc;
use std::time::Duration;

use flag_harness_client::EvaluateFlagParams;
use flag_harness_client::SdkClientHandle;
use flag_harness_config::EnvOverrides;
use flag_harness_config::HarnessConfig;
use flag_harness_core::MemoryLogSink;
use flag_harness_core::SdkKind;
use serde_json::Value;
use serde_json::json;
use system_tests::TestHarness;

use self::stub_sdk::StubSdk;

/// Boxed error used by test bodies.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// One test's service, harness, and log.
pub struct TestScope {
    /// Harness wired to the reference service.
    pub harness: TestHarness,
    /// Reference test service.
    pub stub: StubSdk,
    /// Captured harness log.
    pub log: Arc<MemoryLogSink>,
}

/// Builds the configuration used by conformance tests.
pub fn scope_config(service_url: &str) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.service.url = service_url.to_string();
    config.service.command_timeout_ms = 10_000;
    config.service.startup_timeout_ms = 5_000;
    config.timeouts.connection_ms = 5_000;
    config.timeouts.quiet_period_ms = 300;
    config.timeouts.extended_quiet_period_ms = 600;
    config.timeouts.event_wait_ms = 5_000;
    if let Ok(loaded) = EnvOverrides::load() {
        config.apply_overrides(&EnvOverrides {
            timeout: loaded.timeout,
            ..EnvOverrides::default()
        });
    }
    config
}

/// Starts a server-side reference service and a harness ready to create clients.
pub async fn start_scope() -> Result<TestScope, DynError> {
    start_scope_as(SdkKind::Server).await
}

/// Starts a reference service behaving as `kind` and a harness for it.
pub async fn start_scope_as(kind: SdkKind) -> Result<TestScope, DynError> {
    let stub = StubSdk::start_as(kind).await?;
    let log = Arc::new(MemoryLogSink::new());
    let harness = TestHarness::with_log(scope_config(stub.url()), log.clone())?;
    harness.wait_for_service().await?;
    Ok(TestScope {
        harness,
        stub,
        log,
    })
}

/// Context used by evaluations that do not care about targeting.
pub fn user_context(key: &str) -> Value {
    json!({ "kind": "user", "key": key })
}

/// Evaluates `flag_key` until it yields `expected` or `timeout` passes.
pub async fn await_value(
    client: &SdkClientHandle,
    flag_key: &str,
    expected: &Value,
    timeout: Duration,
) -> Result<(), DynError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let params = EvaluateFlagParams::new(flag_key, user_context("poller"), Value::Null);
    loop {
        let last = client.evaluate(&params).await?.value;
        if &last == expected {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!(
                "flag {flag_key} still evaluates to {last} after {}ms, expected {expected}",
                timeout.as_millis()
            )
            .into());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Evaluates `flag_key` once with a null default.
pub async fn evaluate_value(client: &SdkClientHandle, flag_key: &str) -> Result<Value, DynError> {
    let params = EvaluateFlagParams::new(flag_key, user_context("reader"), Value::Null);
    Ok(client.evaluate(&params).await?.value)
}
