// system-tests/tests/suites/events_and_hooks.rs
// ============================================================================
// Module: Events and Hooks Tests
// Description: Analytics delivery and evaluation hook callbacks.
// Purpose: Verify event batches, payload ids, gzip, and hook stages.
// Dependencies: system-tests helpers, flag-harness-client, flag-harness-mock
// ============================================================================

//! Analytics event and hook conformance tests.

use flag_harness_client::ClientError;
use flag_harness_client::Configurer;
use flag_harness_client::CustomEventParams;
use flag_harness_client::EvaluateFlagParams;
use flag_harness_client::MigrationVariationParams;
use flag_harness_core::FlagBuilder;
use flag_harness_core::ServerDataSet;
use flag_harness_mock::HookStage;
use serde_json::json;

use crate::helpers::DynError;
use crate::helpers::start_scope;
use crate::helpers::user_context;

fn data() -> ServerDataSet {
    ServerDataSet::builder().flag(FlagBuilder::single_value("flag", 1, json!("on"))).build()
}

#[tokio::test(flavor = "multi_thread")]
async fn flushed_events_arrive_as_one_gzipped_batch() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let (_stream, endpoint) = harness.streaming(data());
    let sink = harness.event_sink();
    let chain = harness
        .streaming_configurers(&endpoint)
        .with(Configurer::events(sink.base_url()))
        .with(Configurer::gzip(true));
    let client = harness.start_client(&chain).await?;

    let params = EvaluateFlagParams::new("flag", user_context("user-a"), json!("default"));
    let detail = client.evaluate(&params.clone().with_detail()).await?;
    assert_eq!(detail.value, json!("on"));
    assert_eq!(detail.reason, Some(json!({ "kind": "OFF" })));
    assert_eq!(client.evaluate(&params).await?.reason, None);
    client
        .custom_event(&CustomEventParams {
            event_key: "checkout".to_string(),
            context: user_context("user-a"),
            data: Some(json!({ "total": 3 })),
            omit_null_data: false,
            metric_value: Some(2.5),
        })
        .await?;
    client.flush_events().await?;

    let batch = sink.expect_batch(timeouts.event_wait()).await?;
    assert!(batch.gzipped);
    assert_eq!(batch.path, "/bulk");
    assert!(batch.payload_id.as_deref().is_some_and(|id| id.starts_with(client.tag())));
    assert_eq!(batch.of_kind("index").len(), 1);
    let custom = batch.of_kind("custom");
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].field("key"), Some(&json!("checkout")));
    assert_eq!(custom[0].field("metricValue"), Some(&json!(2.5)));
    let summary = batch.of_kind("summary");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].payload()["features"]["flag"]["counters"][0]["count"], json!(2));

    client.flush_events().await?;
    sink.expect_no_batch(timeouts.quiet_period()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn every_hook_sees_each_stage() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let (_stream, endpoint) = harness.streaming(data());
    let mut hooks = harness.hook_service();
    let alpha = hooks.add_hook("alpha")?;
    let beta = hooks.add_hook("beta")?;
    let chain = harness
        .streaming_configurers(&endpoint)
        .with(Configurer::hook("alpha", alpha))
        .with(Configurer::hook("beta", beta));
    let client = harness.start_client(&chain).await?;

    let params = EvaluateFlagParams::new("flag", user_context("user-b"), json!("default"));
    client.evaluate(&params).await?;
    let calls = hooks.await_calls_from_each(&["alpha", "beta"], timeouts.event_wait()).await?;
    for (name, call) in &calls {
        assert_eq!(call.stage, HookStage::BeforeEvaluation, "hook {name}");
        assert_eq!(call.data["evaluationSeriesContext"]["flagKey"], json!("flag"));
    }
    let after = hooks.await_call("alpha", timeouts.event_wait()).await?;
    assert_eq!(after.stage, HookStage::AfterEvaluation);
    assert_eq!(after.data["evaluationDetail"]["value"], json!("on"));

    let stages = client.hook_query("alpha").await?.stages;
    assert_eq!(stages, vec!["beforeEvaluation".to_string(), "afterEvaluation".to_string()]);
    hooks.expect_no_call("alpha", timeouts.quiet_period()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn undeclared_capabilities_are_rejected_locally() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let (_stream, endpoint) = harness.streaming(data());
    let client = harness.start_client(&harness.streaming_configurers(&endpoint)).await?;
    assert!(client.has_capability("evaluation-hooks"));
    assert!(!client.has_capability("migrations"));

    let commands_before = scope.log.events_named("client_command").len();
    let result = client
        .migration_variation(&MigrationVariationParams {
            key: "migration".to_string(),
            context: user_context("user-c"),
            default_stage: "off".to_string(),
        })
        .await;
    assert!(matches!(result, Err(ClientError::MissingCapability { .. })));
    assert_eq!(scope.log.events_named("client_command").len(), commands_before);
    Ok(())
}
