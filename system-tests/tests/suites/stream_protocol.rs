// system-tests/tests/suites/stream_protocol.rs
// ============================================================================
// Module: Stream Protocol Tests
// Description: Versioned streaming contract checks.
// Purpose: Verify commit atomicity, version monotonicity, and frame handling.
// Dependencies: system-tests helpers, flag-harness-core, flag-harness-mock
// ============================================================================

//! Streaming protocol conformance tests.

use flag_harness_core::EntityKind;
use flag_harness_core::FlagBuilder;
use flag_harness_core::FlagRequestMethod;
use flag_harness_core::SdkKind;
use flag_harness_core::ServerDataSet;
use flag_harness_core::StreamFrame;
use flag_harness_core::protocol::HEARTBEAT;
use flag_harness_core::protocol::PUT_OBJECT;
use flag_harness_mock::SequentialHandler;
use flag_harness_mock::StreamingService;
use flag_harness_mock::shared;
use serde_json::Value;
use serde_json::json;

use crate::helpers::DynError;
use crate::helpers::await_value;
use crate::helpers::evaluate_value;
use crate::helpers::start_scope;

fn flag_data(value: &str) -> ServerDataSet {
    ServerDataSet::builder().flag(FlagBuilder::single_value("flag", 1, json!(value))).build()
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_transfer_is_evaluated() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let (_stream, endpoint) = harness.streaming(flag_data("a"));
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;

    let connection = endpoint.await_connection(harness.timeouts().connection()).await?;
    let expected =
        harness.expected_stream_request(SdkKind::Server, FlagRequestMethod::Get, &Value::Null, None);
    harness.check_flag_request(SdkKind::Server, connection.request(), &expected)?;
    assert_eq!(evaluate_value(&client, "flag").await?, json!("a"));
    assert_eq!(evaluate_value(&client, "missing").await?, json!(null));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_apply_only_after_payload_transferred() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let (stream, endpoint) = harness.streaming(flag_data("a"));
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;
    endpoint.await_connection(timeouts.connection()).await?;

    let updated = serde_json::to_value(FlagBuilder::single_value("flag", 2, json!("b")))?;
    let added = serde_json::to_value(FlagBuilder::single_value("new-flag", 1, json!("new")))?;
    stream.push_update(EntityKind::Flag, "flag", 2, updated)?;
    stream.push_update(EntityKind::Flag, "new-flag", 1, added)?;
    tokio::time::sleep(timeouts.quiet_period()).await;
    assert_eq!(evaluate_value(&client, "flag").await?, json!("a"));
    assert_eq!(evaluate_value(&client, "new-flag").await?, json!(null));

    stream.push_payload_transferred()?;
    await_value(&client, "flag", &json!("b"), timeouts.connection()).await?;
    assert_eq!(evaluate_value(&client, "new-flag").await?, json!("new"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_versions_are_ignored() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let data = ServerDataSet::builder()
        .flag(FlagBuilder::single_value("flag", 5, json!("current")))
        .build();
    let (stream, endpoint) = harness.streaming(data);
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;
    endpoint.await_connection(timeouts.connection()).await?;

    let stale = serde_json::to_value(FlagBuilder::single_value("flag", 4, json!("stale")))?;
    stream.push_update(EntityKind::Flag, "flag", 4, stale)?;
    let same = serde_json::to_value(FlagBuilder::single_value("flag", 5, json!("same")))?;
    stream.push_update(EntityKind::Flag, "flag", 5, same)?;
    stream.push_payload_transferred()?;
    stream.push_delete(EntityKind::Flag, "flag", 3)?;
    stream.push_payload_transferred()?;
    tokio::time::sleep(timeouts.quiet_period()).await;
    assert_eq!(evaluate_value(&client, "flag").await?, json!("current"));

    stream.push_delete(EntityKind::Flag, "flag", 6)?;
    stream.push_payload_transferred()?;
    await_value(&client, "flag", &json!(null), timeouts.connection()).await?;
    Ok(())
}

/// Pushes `payload` as a `put-object` and expects the client to reconnect
/// with its committed basis and pick up the next stream's data.
async fn assert_reconnect_after_put_object(payload: &str) -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let first_stream = StreamingService::new(flag_data("a"));
    let second_stream = StreamingService::new(flag_data("b"));
    let endpoint = harness.endpoint(SequentialHandler::new(vec![
        shared(first_stream.clone()),
        shared(second_stream),
    ])?);
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;
    let first = endpoint.await_connection(timeouts.connection()).await?;
    assert_eq!(first.request().query_param("basis"), None);
    assert_eq!(evaluate_value(&client, "flag").await?, json!("a"));

    first_stream.push_raw(StreamFrame {
        name: PUT_OBJECT.to_string(),
        data: payload.to_string(),
    })?;
    let second = endpoint.await_connection(timeouts.connection()).await?;
    let basis = first_stream.source().selector()?.state;
    assert_eq!(second.request().query_param("basis"), Some(basis));
    await_value(&client, "flag", &json!("b"), timeouts.connection()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_json_forces_reconnect_with_basis() -> Result<(), DynError> {
    assert_reconnect_after_put_object("{not json").await
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_violation_forces_reconnect_with_basis() -> Result<(), DynError> {
    let payload = json!({ "kind": "flag", "key": "flag", "version": "7", "object": {} });
    assert_reconnect_after_put_object(&payload.to_string()).await
}

/// Pushes an unknown frame carrying `data` and expects the stream to survive.
async fn assert_unknown_frame_ignored(data: &str) -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let (stream, endpoint) = harness.streaming(flag_data("a"));
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;
    endpoint.await_connection(timeouts.connection()).await?;

    stream.push_raw(StreamFrame {
        name: "brand-new-frame".to_string(),
        data: data.to_string(),
    })?;
    stream.push_raw(StreamFrame {
        name: HEARTBEAT.to_string(),
        data: String::new(),
    })?;
    endpoint.require_no_connection(timeouts.quiet_period()).await?;

    let updated = serde_json::to_value(FlagBuilder::single_value("flag", 2, json!("b")))?;
    stream.push_update(EntityKind::Flag, "flag", 2, updated)?;
    stream.push_payload_transferred()?;
    await_value(&client, "flag", &json!("b"), timeouts.connection()).await?;
    assert_eq!(endpoint.connection_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_frame_with_invalid_json_is_ignored() -> Result<(), DynError> {
    assert_unknown_frame_ignored("{not json either").await
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_frame_with_json_body_is_ignored() -> Result<(), DynError> {
    let body = json!({ "kind": "flag", "key": "flag", "version": 99, "object": { "on": true } });
    assert_unknown_frame_ignored(&body.to_string()).await
}
