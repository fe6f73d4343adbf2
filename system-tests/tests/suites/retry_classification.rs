// system-tests/tests/suites/retry_classification.rs
// ============================================================================
// Module: Retry Classification Tests
// Description: Recoverable and unrecoverable stream failures.
// Purpose: Verify retry counts per status class against the reference SDK.
// Dependencies: system-tests helpers, flag-harness-core, flag-harness-mock
// ============================================================================

//! Retry classification conformance tests.

use std::time::Duration;

use flag_harness_client::Configurer;
use flag_harness_core::FlagBuilder;
use flag_harness_core::RECOVERABLE_STATUSES;
use flag_harness_core::ServerDataSet;
use flag_harness_core::UNRECOVERABLE_STATUSES;
use flag_harness_mock::SequentialHandler;
use flag_harness_mock::StatusHandler;
use flag_harness_mock::StreamingService;
use flag_harness_mock::shared;
use serde_json::json;

use crate::helpers::DynError;
use crate::helpers::evaluate_value;
use crate::helpers::start_scope;

const RETRY_DELAY: Duration = Duration::from_millis(20);

#[tokio::test(flavor = "multi_thread")]
async fn recoverable_statuses_are_retried() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let data = ServerDataSet::builder().flag(FlagBuilder::single_value("flag", 1, json!(true))).build();
    for status in RECOVERABLE_STATUSES {
        let stream = StreamingService::new(data.clone());
        let endpoint = harness.endpoint(SequentialHandler::new(vec![
            shared(StatusHandler::new(status)),
            shared(StatusHandler::new(status)),
            shared(stream),
        ])?);
        let chain = harness
            .streaming_configurers(&endpoint)
            .with(Configurer::stream_retry_delay(RETRY_DELAY));
        let client = harness.start_client(&chain).await?;

        for _ in 0..3 {
            endpoint.await_connection(timeouts.connection()).await?;
        }
        assert_eq!(evaluate_value(&client, "flag").await?, json!(true), "status {status}");
        endpoint.require_no_connection(timeouts.quiet_period()).await?;
        assert_eq!(endpoint.connection_count(), 3, "status {status}");
        client.close().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unrecoverable_statuses_stop_the_data_source() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    for status in UNRECOVERABLE_STATUSES {
        let endpoint = harness.endpoint(StatusHandler::new(status));
        let chain = harness
            .streaming_configurers(&endpoint)
            .with(Configurer::stream_retry_delay(RETRY_DELAY))
            .with(Configurer::start_wait(timeouts.connection(), true));
        let client = harness.start_client(&chain).await?;

        endpoint.await_connection(timeouts.connection()).await?;
        endpoint.require_no_connection(timeouts.extended_quiet_period()).await?;
        assert_eq!(endpoint.connection_count(), 1, "status {status}");
        assert_eq!(evaluate_value(&client, "flag").await?, json!(null), "status {status}");
        client.close().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_initialization_is_reported_by_the_service() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let endpoint = harness.endpoint(StatusHandler::new(401));
    let result = harness.start_client(&harness.streaming_configurers(&endpoint)).await;
    let Err(err) = result else {
        return Err("client start should fail when initialization cannot succeed".into());
    };
    assert!(err.to_string().contains("500"), "unexpected error: {err}");
    assert_eq!(scope.stub.instance_count(), 0);
    Ok(())
}
