// crates/flag-harness-client/src/configurer.rs
// ============================================================================
// Module: Configurer Chain
// Description: Ordered mutations composing one SDK configuration record.
// Purpose: Let tests build configurations from small reusable pieces.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! A [`ConfigurerChain`] applies [`Configurer`]s in order to a zero-valued
//! [`SdkConfigParams`]. A chain may be made of patches alone; when a
//! full-replace configurer is present it must come first, and patches refine
//! what it establishes.
//! Invariants:
//! - A full-replace configurer anywhere but first fails the build.
//! - A built record always names a data source base URI, and an events record
//!   always carries its base URI.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ClientError;
use crate::params::ClientSideParams;
use crate::params::EventParams;
use crate::params::HookInstanceParams;
use crate::params::HookParams;
use crate::params::PollingParams;
use crate::params::SdkConfigParams;
use crate::params::StreamingParams;
use crate::params::TagParams;

// ============================================================================
// SECTION: Configurer
// ============================================================================

/// Whether a configurer replaces the record or refines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurerKind {
    /// Overwrites the whole record.
    FullReplace,
    /// Mutates selected fields.
    Patch,
}

/// Mutation closure type.
type ApplyFn = Arc<dyn Fn(&mut SdkConfigParams) + Send + Sync>;

/// One named step of a configurer chain.
#[derive(Clone)]
pub struct Configurer {
    /// Name used in error messages.
    name: String,
    /// Replace or patch.
    kind: ConfigurerKind,
    /// Mutation applied to the record.
    apply: ApplyFn,
}

impl fmt::Debug for Configurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configurer").field("name", &self.name).field("kind", &self.kind).finish()
    }
}

impl Configurer {
    /// Builds a custom patch configurer.
    pub fn patch<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut SdkConfigParams) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ConfigurerKind::Patch,
            apply: Arc::new(apply),
        }
    }

    /// Builds a configurer that replaces the record with `params`.
    #[must_use]
    pub fn replace(params: SdkConfigParams) -> Self {
        Self {
            name: "replace".to_string(),
            kind: ConfigurerKind::FullReplace,
            apply: Arc::new(move |target| *target = params.clone()),
        }
    }

    /// Starts a record with only a credential.
    #[must_use]
    pub fn base(credential: impl Into<String>) -> Self {
        Self::replace(SdkConfigParams {
            credential: credential.into(),
            ..SdkConfigParams::default()
        })
    }

    /// Returns the configurer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configurer kind.
    #[must_use]
    pub const fn kind(&self) -> ConfigurerKind {
        self.kind
    }

    /// Replaces the credential.
    #[must_use]
    pub fn credential(credential: impl Into<String>) -> Self {
        let credential = credential.into();
        Self::patch("credential", move |params| params.credential.clone_from(&credential))
    }

    /// Points the streaming data source at `base_uri`.
    #[must_use]
    pub fn streaming(base_uri: impl Into<String>) -> Self {
        let base_uri = base_uri.into();
        Self::patch("streaming", move |params| {
            params.streaming.get_or_insert_with(StreamingParams::default).base_uri =
                Some(base_uri.clone());
        })
    }

    /// Sets the initial stream reconnect delay.
    #[must_use]
    pub fn stream_retry_delay(delay: Duration) -> Self {
        let millis = duration_millis(delay);
        Self::patch("stream-retry-delay", move |params| {
            params.streaming.get_or_insert_with(StreamingParams::default).initial_retry_delay_ms =
                Some(millis);
        })
    }

    /// Points the polling data source at `base_uri`.
    #[must_use]
    pub fn polling(base_uri: impl Into<String>) -> Self {
        let base_uri = base_uri.into();
        Self::patch("polling", move |params| {
            params.polling.get_or_insert_with(PollingParams::default).base_uri =
                Some(base_uri.clone());
        })
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn poll_interval(interval: Duration) -> Self {
        let millis = duration_millis(interval);
        Self::patch("poll-interval", move |params| {
            params.polling.get_or_insert_with(PollingParams::default).poll_interval_ms =
                Some(millis);
        })
    }

    /// Enables analytics events sent to `base_uri`.
    #[must_use]
    pub fn events(base_uri: impl Into<String>) -> Self {
        let base_uri = base_uri.into();
        Self::patch("events", move |params| {
            params.events.get_or_insert_with(EventParams::default).base_uri =
                Some(base_uri.clone());
        })
    }

    /// Toggles gzip-compressed event posts.
    #[must_use]
    pub fn gzip(enabled: bool) -> Self {
        Self::patch("gzip", move |params| {
            params.events.get_or_insert_with(EventParams::default).enable_gzip = enabled;
        })
    }

    /// Toggles diagnostic events.
    #[must_use]
    pub fn diagnostics(enabled: bool) -> Self {
        Self::patch("diagnostics", move |params| {
            params.events.get_or_insert_with(EventParams::default).enable_diagnostics = enabled;
        })
    }

    /// Sets the event flush interval.
    #[must_use]
    pub fn flush_interval(interval: Duration) -> Self {
        let millis = duration_millis(interval);
        Self::patch("flush-interval", move |params| {
            params.events.get_or_insert_with(EventParams::default).flush_interval_ms =
                Some(millis);
        })
    }

    /// Registers a hook that posts each stage call to `callback_uri`.
    #[must_use]
    pub fn hook(name: impl Into<String>, callback_uri: impl Into<String>) -> Self {
        Self::hook_instance(HookInstanceParams {
            name: name.into(),
            callback_uri: callback_uri.into(),
            data: None,
            errors: None,
        })
    }

    /// Registers a fully described hook instance.
    #[must_use]
    pub fn hook_instance(instance: HookInstanceParams) -> Self {
        Self::patch("hook", move |params| {
            params.hooks.get_or_insert_with(HookParams::default).hooks.push(instance.clone());
        })
    }

    /// Sets the initial context of a client-side SDK.
    #[must_use]
    pub fn client_side(initial_context: Value) -> Self {
        Self::patch("client-side", move |params| {
            params.client_side.get_or_insert_with(ClientSideParams::default).initial_context =
                Some(initial_context.clone());
        })
    }

    /// Toggles evaluation reasons for a client-side SDK.
    #[must_use]
    pub fn evaluation_reasons(enabled: bool) -> Self {
        Self::patch("evaluation-reasons", move |params| {
            params.client_side.get_or_insert_with(ClientSideParams::default).evaluation_reasons =
                Some(enabled);
        })
    }

    /// Toggles `REPORT` flag retrieval for a client-side SDK.
    #[must_use]
    pub fn use_report(enabled: bool) -> Self {
        Self::patch("use-report", move |params| {
            params.client_side.get_or_insert_with(ClientSideParams::default).use_report =
                Some(enabled);
        })
    }

    /// Sets application tags.
    #[must_use]
    pub fn tags(application_id: Option<String>, application_version: Option<String>) -> Self {
        Self::patch("tags", move |params| {
            params.tags = Some(TagParams {
                application_id: application_id.clone(),
                application_version: application_version.clone(),
            });
        })
    }

    /// Sets the initialization wait and whether a failed start is tolerated.
    #[must_use]
    pub fn start_wait(wait: Duration, init_can_fail: bool) -> Self {
        let millis = duration_millis(wait);
        Self::patch("start-wait", move |params| {
            params.start_wait_time_ms = Some(millis);
            params.init_can_fail = init_can_fail;
        })
    }
}

/// Converts a duration to whole milliseconds, saturating.
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Chain
// ============================================================================

/// Ordered list of configurers.
#[derive(Debug, Clone, Default)]
pub struct ConfigurerChain {
    /// Configurers in application order.
    configurers: Vec<Configurer>,
}

impl ConfigurerChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a configurer.
    #[must_use]
    pub fn with(mut self, configurer: Configurer) -> Self {
        self.configurers.push(configurer);
        self
    }

    /// Appends a configurer in place.
    pub fn push(&mut self, configurer: Configurer) {
        self.configurers.push(configurer);
    }

    /// Returns the number of configurers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configurers.len()
    }

    /// Returns true when the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configurers.is_empty()
    }

    /// Applies every configurer and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] when a full-replace
    /// configurer follows another configurer, or the record fails
    /// [`validate_params`].
    pub fn build(&self) -> Result<SdkConfigParams, ClientError> {
        if let Some((position, late)) = self
            .configurers
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, configurer)| configurer.kind == ConfigurerKind::FullReplace)
        {
            return Err(ClientError::InvalidConfiguration(format!(
                "full-replace configurer {} at position {position} would discard earlier configurers",
                late.name
            )));
        }
        let mut params = SdkConfigParams::default();
        for configurer in &self.configurers {
            (configurer.apply)(&mut params);
        }
        validate_params(&params)?;
        Ok(params)
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Checks a record is usable before it is sent to a test service.
///
/// # Errors
///
/// Returns [`ClientError::InvalidConfiguration`] naming the missing field.
pub fn validate_params(params: &SdkConfigParams) -> Result<(), ClientError> {
    if params.credential.trim().is_empty() {
        return Err(ClientError::InvalidConfiguration("credential is required".to_string()));
    }
    match (&params.streaming, &params.polling) {
        (Some(streaming), _) => {
            if !has_uri(streaming.base_uri.as_deref()) {
                return Err(ClientError::InvalidConfiguration(
                    "streaming.baseUri is required".to_string(),
                ));
            }
        }
        (None, Some(polling)) => {
            if !has_uri(polling.base_uri.as_deref()) {
                return Err(ClientError::InvalidConfiguration(
                    "polling.baseUri is required for a polling-only configuration".to_string(),
                ));
            }
        }
        (None, None) => {
            return Err(ClientError::InvalidConfiguration(
                "a streaming or polling data source is required".to_string(),
            ));
        }
    }
    if let Some(events) = &params.events
        && !has_uri(events.base_uri.as_deref())
    {
        return Err(ClientError::InvalidConfiguration("events.baseUri is required".to_string()));
    }
    if let Some(hooks) = &params.hooks
        && let Some(hook) = hooks.hooks.iter().find(|hook| hook.callback_uri.trim().is_empty())
    {
        return Err(ClientError::InvalidConfiguration(format!(
            "hook {} needs a callbackUri",
            hook.name
        )));
    }
    Ok(())
}

/// Returns true for a present, non-blank URI.
fn has_uri(uri: Option<&str>) -> bool {
    uri.is_some_and(|uri| !uri.trim().is_empty())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
