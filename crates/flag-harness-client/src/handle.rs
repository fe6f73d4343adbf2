// crates/flag-harness-client/src/handle.rs
// ============================================================================
// Module: SDK Client Handle
// Description: One SDK instance hosted by a test service.
// Purpose: Send typed commands to the instance and tear it down.
// Dependencies: reqwest, serde_json, tokio, url, flag-harness-core
// ============================================================================

//! ## Overview
//! An [`SdkClientHandle`] owns one remote SDK instance. Each command is a
//! single `POST` of a tagged envelope answered by one typed response. Errors
//! are returned, never retried. Dropping the handle deletes the instance in
//! the background; [`SdkClientHandle::close`] deletes it and waits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use flag_harness_core::HarnessLogEvent;
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::commands::AliasEventParams;
use crate::commands::BigSegmentStoreStatusParams;
use crate::commands::BigSegmentStoreStatusResponse;
use crate::commands::Command;
use crate::commands::CustomEventParams;
use crate::commands::EvaluateAllFlagsParams;
use crate::commands::EvaluateAllFlagsResponse;
use crate::commands::EvaluateFlagParams;
use crate::commands::EvaluateFlagResponse;
use crate::commands::FlushEventsParams;
use crate::commands::HookQueryParams;
use crate::commands::HookQueryResponse;
use crate::commands::IdentifyEventParams;
use crate::commands::IdentifyParams;
use crate::commands::MigrationOperationParams;
use crate::commands::MigrationOperationResponse;
use crate::commands::MigrationVariationParams;
use crate::commands::MigrationVariationResponse;
use crate::commands::OpenFeatureEvaluateParams;
use crate::commands::OpenFeatureEvaluateResponse;
use crate::commands::envelope;
use crate::commands::parse_response;
use crate::commands::raw_envelope;
use crate::error::ClientError;
use crate::service::COMPONENT;
use crate::service::ServiceResponse;
use crate::service::ServiceTransport;

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Handle to one SDK instance.
pub struct SdkClientHandle {
    /// Shared transport.
    transport: ServiceTransport,
    /// Instance URL from the create response.
    url: Url,
    /// Instance tag.
    tag: String,
    /// Capabilities the service declared at creation.
    capabilities: Vec<String>,
    /// Set once the instance has been deleted.
    closed: bool,
}

impl std::fmt::Debug for SdkClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkClientHandle")
            .field("url", &self.url)
            .field("tag", &self.tag)
            .field("capabilities", &self.capabilities)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SdkClientHandle {
    /// Wraps a created instance.
    pub(crate) fn new(
        transport: ServiceTransport,
        url: Url,
        tag: &str,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            transport,
            url,
            tag: tag.to_string(),
            capabilities,
            closed: false,
        }
    }

    /// Returns the instance URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the instance tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns true when the service declared `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|declared| declared == capability)
    }

    /// Sends a typed command.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingCapability`] before sending when the
    /// service lacks the command's capability, and transport, status, or
    /// protocol errors otherwise.
    pub async fn send_command<C: Command>(&self, command: &C) -> Result<C::Response, ClientError> {
        if let Some(capability) = C::required_capability()
            && !self.has_capability(capability)
        {
            return Err(ClientError::MissingCapability {
                capability: capability.to_string(),
            });
        }
        let body = envelope(command)?;
        let bytes = self.post(C::NAME, &body).await?;
        parse_response(C::NAME, &bytes)
    }

    /// Sends a command by name with untyped parameters.
    ///
    /// # Errors
    ///
    /// Returns transport, status, or protocol errors.
    pub async fn send_raw(&self, name: &str, params: Value) -> Result<Value, ClientError> {
        let bytes = self.post(name, &raw_envelope(name, params)).await?;
        parse_response(name, &bytes)
    }

    /// Posts one envelope and returns the response body.
    async fn post(&self, name: &str, body: &Value) -> Result<Vec<u8>, ClientError> {
        let result = self
            .transport
            .send(Method::POST, &self.url, Some(body))
            .await
            .and_then(ServiceResponse::require_success);
        let mut event = HarnessLogEvent::new("client_command", COMPONENT, name.to_string())
            .scope(self.tag.as_str())
            .field("command", name);
        match &result {
            Ok(response) => event = event.field("status", response.status.as_u16()),
            Err(err) => event = event.field("error", err.to_string()),
        }
        self.transport.log.record(&event);
        result.map(|response| response.body)
    }

    /// Evaluates one flag.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn evaluate(
        &self,
        params: &EvaluateFlagParams,
    ) -> Result<EvaluateFlagResponse, ClientError> {
        self.send_command(params).await
    }

    /// Evaluates every flag.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn evaluate_all(
        &self,
        params: &EvaluateAllFlagsParams,
    ) -> Result<EvaluateAllFlagsResponse, ClientError> {
        self.send_command(params).await
    }

    /// Switches a client-side SDK to `context`.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn identify(&self, context: Value) -> Result<(), ClientError> {
        self.send_command(&IdentifyParams {
            context,
        })
        .await
        .map(drop)
    }

    /// Sends an identify event.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn identify_event(&self, context: Value) -> Result<(), ClientError> {
        self.send_command(&IdentifyEventParams {
            context,
        })
        .await
        .map(drop)
    }

    /// Sends a custom event.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn custom_event(&self, params: &CustomEventParams) -> Result<(), ClientError> {
        self.send_command(params).await.map(drop)
    }

    /// Sends a legacy alias event.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn alias_event(&self, params: &AliasEventParams) -> Result<(), ClientError> {
        self.send_command(params).await.map(drop)
    }

    /// Flushes buffered events.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn flush_events(&self) -> Result<(), ClientError> {
        self.send_command(&FlushEventsParams {}).await.map(drop)
    }

    /// Reads a migration stage.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn migration_variation(
        &self,
        params: &MigrationVariationParams,
    ) -> Result<MigrationVariationResponse, ClientError> {
        self.send_command(params).await
    }

    /// Runs a migration operation.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn migration_operation(
        &self,
        params: &MigrationOperationParams,
    ) -> Result<MigrationOperationResponse, ClientError> {
        self.send_command(params).await
    }

    /// Evaluates through the `OpenFeature` provider.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn open_feature_evaluate(
        &self,
        params: &OpenFeatureEvaluateParams,
    ) -> Result<OpenFeatureEvaluateResponse, ClientError> {
        self.send_command(params).await
    }

    /// Reads the big segment store status.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn big_segment_store_status(
        &self,
    ) -> Result<BigSegmentStoreStatusResponse, ClientError> {
        self.send_command(&BigSegmentStoreStatusParams {}).await
    }

    /// Queries the stages a hook has executed.
    ///
    /// # Errors
    ///
    /// See [`SdkClientHandle::send_command`].
    pub async fn hook_query(&self, hook_name: &str) -> Result<HookQueryResponse, ClientError> {
        self.send_command(&HookQueryParams {
            hook_name: hook_name.to_string(),
        })
        .await
    }

    /// Deletes the instance and waits for the service to confirm.
    ///
    /// # Errors
    ///
    /// Returns transport or status errors; the handle is consumed either way.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.closed = true;
        let result = self
            .transport
            .send(Method::DELETE, &self.url, None)
            .await
            .and_then(ServiceResponse::require_success)
            .map(drop);
        self.log_close("closed");
        result
    }

    /// Records a close event.
    fn log_close(&self, how: &str) {
        self.transport.log.record(
            &HarnessLogEvent::new("client_close", COMPONENT, format!("sdk client {how}"))
                .scope(self.tag.as_str())
                .field("location", self.url.as_str()),
        );
    }
}

impl Drop for SdkClientHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.delete_detached(self.url.clone());
        self.log_close("dropped");
    }
}
