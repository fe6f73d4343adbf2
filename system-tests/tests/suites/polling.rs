// system-tests/tests/suites/polling.rs
// ============================================================================
// Module: Polling Tests
// Description: Polling-only data source behavior.
// Purpose: Verify polls carry the basis and pick up committed changes.
// Dependencies: system-tests helpers, flag-harness-mock
// ============================================================================

//! Polling conformance tests.

use std::time::Duration;

use flag_harness_client::Configurer;
use flag_harness_core::EntityKind;
use flag_harness_core::FlagBuilder;
use flag_harness_core::ItemChange;
use flag_harness_core::SdkKind;
use flag_harness_core::ServerDataSet;
use flag_harness_core::StreamProtocol;
use flag_harness_mock::DataSource;
use serde_json::json;

use crate::helpers::DynError;
use crate::helpers::await_value;
use crate::helpers::evaluate_value;
use crate::helpers::start_scope;

#[tokio::test(flavor = "multi_thread")]
async fn polling_client_follows_committed_changes() -> Result<(), DynError> {
    let scope = start_scope().await?;
    let harness = &scope.harness;
    let timeouts = harness.timeouts().clone();
    let source = DataSource::new(
        ServerDataSet::builder().flag(FlagBuilder::single_value("flag", 1, json!("first"))).build(),
    );
    let endpoint = harness.polling(source.clone(), StreamProtocol::Versioned);
    let chain = harness
        .base_configurers(SdkKind::Server)
        .with(Configurer::polling(endpoint.base_url()))
        .with(Configurer::poll_interval(Duration::from_millis(50)))
        .with(Configurer::start_wait(timeouts.connection(), false));
    let client = harness.start_client(&chain).await?;
    assert_eq!(evaluate_value(&client, "flag").await?, json!("first"));

    let first = endpoint.await_connection(timeouts.connection()).await?;
    assert_eq!(first.request().path, "/sdk/poll");
    assert_eq!(first.request().query_param("basis"), None);
    let second = endpoint.await_connection(timeouts.connection()).await?;
    assert!(second.request().query_param("basis").is_some());

    let updated = serde_json::to_value(FlagBuilder::single_value("flag", 2, json!("second")))?;
    source.stage(ItemChange::put(EntityKind::Flag, "flag", 2, updated))?;
    tokio::time::sleep(timeouts.quiet_period()).await;
    assert_eq!(evaluate_value(&client, "flag").await?, json!("first"));
    source.commit()?;
    await_value(&client, "flag", &json!("second"), timeouts.connection()).await?;
    assert!(scope.log.events_named("poll").len() >= 2);
    Ok(())
}
