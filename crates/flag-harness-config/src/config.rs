// crates/flag-harness-config/src/config.rs
// ============================================================================
// Module: Flag Harness Configuration
// Description: Configuration loading and validation for conformance runs.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: flag-harness-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! then environment overrides are applied, then the result is validated.
//! Every section has defaults, so an empty file (or no file at all when the
//! path is not given explicitly) yields a usable local setup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flag_harness_core::FileLogSink;
use flag_harness_core::NoopLogSink;
use flag_harness_core::SharedLogSink;
use flag_harness_core::StderrLogSink;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::env::EnvOverrides;
use crate::env::HarnessEnv;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "flag-harness.toml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum credential length.
pub(crate) const MAX_CREDENTIAL_LENGTH: usize = 256;
/// Maximum accepted request body for mock endpoints.
pub(crate) const MAX_BODY_BYTES_LIMIT: usize = 64 * 1024 * 1024;
/// Longest timeout accepted anywhere in the config.
pub(crate) const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Mock backend server settings.
    #[serde(default)]
    pub server: MockServerConfig,
    /// Test-service connection settings.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Default credentials handed to SDK clients.
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Wait timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Log sink selection.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// An explicit path (argument or `FLAG_HARNESS_CONFIG`) must exist; the
    /// default `flag-harness.toml` is optional and defaults apply without it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, explicit) = resolve_path(path)?;
        validate_path(&resolved)?;
        if !explicit && !resolved.exists() {
            let mut config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration and applies process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, override parsing, or validation fails.
    pub fn from_environment() -> Result<Self, ConfigError> {
        let overrides = EnvOverrides::load().map_err(ConfigError::Invalid)?;
        let mut config = Self::load(None)?;
        config.apply_overrides(&overrides);
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides on top of file values.
    ///
    /// A timeout override raises every wait timeout to at least its value and
    /// never shortens one.
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) {
        if let Some(url) = &overrides.service_url {
            self.service.url.clone_from(url);
        }
        if let Some(host) = &overrides.bind_host {
            self.server.bind_host.clone_from(host);
        }
        if let Some(path) = &overrides.log_path {
            self.logging.sink = LogSinkKind::File;
            self.logging.path = Some(path.clone());
        }
        if let Some(minimum) = overrides.timeout {
            let minimum_ms = u64::try_from(minimum.as_millis()).unwrap_or(u64::MAX);
            self.timeouts.connection_ms = self.timeouts.connection_ms.max(minimum_ms);
            self.timeouts.event_wait_ms = self.timeouts.event_wait_ms.max(minimum_ms);
            self.service.command_timeout_ms = self.service.command_timeout_ms.max(minimum_ms);
            self.service.startup_timeout_ms = self.service.startup_timeout_ms.max(minimum_ms);
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.service.validate()?;
        self.credentials.validate()?;
        self.timeouts.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Builds the configured log sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the log file cannot be opened.
    pub fn build_log_sink(&self) -> Result<SharedLogSink, ConfigError> {
        match self.logging.sink {
            LogSinkKind::Stderr => Ok(Arc::new(StderrLogSink)),
            LogSinkKind::None => Ok(Arc::new(NoopLogSink)),
            LogSinkKind::File => {
                let path = self.logging.path.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("logging.path is required for file sink".to_string())
                })?;
                let sink = FileLogSink::new(Path::new(path.trim()))
                    .map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
        }
    }
}

/// Mock backend server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Host the mock server binds to (port is always ephemeral).
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Maximum request body accepted by mock endpoints.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl MockServerConfig {
    /// Validates server settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind_host must be non-empty".to_string()));
        }
        if self.bind_host.contains(':') && !self.bind_host.starts_with('[') {
            return Err(ConfigError::Invalid(
                "server.bind_host must not include a port".to_string(),
            ));
        }
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid("server.max_body_bytes out of range".to_string()));
        }
        Ok(())
    }
}

/// Test-service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Base URL of the SDK test service.
    #[serde(default = "default_service_url")]
    pub url: String,
    /// Timeout for a single command round trip.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// How long to wait for the test service to start answering.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            command_timeout_ms: default_command_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    /// Validates service settings.
    fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(self.url.trim())
            .map_err(|err| ConfigError::Invalid(format!("service.url is invalid: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("service.url must use http or https".to_string()));
        }
        validate_timeout("service.command_timeout_ms", self.command_timeout_ms)?;
        validate_timeout("service.startup_timeout_ms", self.startup_timeout_ms)?;
        Ok(())
    }

    /// Command round-trip timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Test-service startup timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Default credentials handed to SDK clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Server-side SDK key.
    #[serde(default = "default_server_key")]
    pub server_key: String,
    /// Mobile key.
    #[serde(default = "default_mobile_key")]
    pub mobile_key: String,
    /// Client-side environment id.
    #[serde(default = "default_client_side_id")]
    pub client_side_id: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            server_key: default_server_key(),
            mobile_key: default_mobile_key(),
            client_side_id: default_client_side_id(),
        }
    }
}

impl CredentialsConfig {
    /// Validates credential values.
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("credentials.server_key", &self.server_key),
            ("credentials.mobile_key", &self.mobile_key),
            ("credentials.client_side_id", &self.client_side_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
            }
            if value.len() > MAX_CREDENTIAL_LENGTH {
                return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
            }
            if value.contains('/') || value.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must not contain slashes or whitespace"
                )));
            }
        }
        Ok(())
    }
}

/// Wait timeouts used by endpoint and queue assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// How long to wait for an expected connection.
    #[serde(default = "default_connection_ms")]
    pub connection_ms: u64,
    /// How long to watch for an unexpected connection or event.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    /// Longer quiet window for slow-retry checks.
    #[serde(default = "default_extended_quiet_period_ms")]
    pub extended_quiet_period_ms: u64,
    /// How long to wait for an expected event batch or hook call.
    #[serde(default = "default_event_wait_ms")]
    pub event_wait_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connection_ms: default_connection_ms(),
            quiet_period_ms: default_quiet_period_ms(),
            extended_quiet_period_ms: default_extended_quiet_period_ms(),
            event_wait_ms: default_event_wait_ms(),
        }
    }
}

impl TimeoutsConfig {
    /// Validates timeout values.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout("timeouts.connection_ms", self.connection_ms)?;
        validate_timeout("timeouts.quiet_period_ms", self.quiet_period_ms)?;
        validate_timeout("timeouts.extended_quiet_period_ms", self.extended_quiet_period_ms)?;
        validate_timeout("timeouts.event_wait_ms", self.event_wait_ms)?;
        if self.extended_quiet_period_ms < self.quiet_period_ms {
            return Err(ConfigError::Invalid(
                "timeouts.extended_quiet_period_ms must be at least quiet_period_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection wait.
    #[must_use]
    pub const fn connection(&self) -> Duration {
        Duration::from_millis(self.connection_ms)
    }

    /// Quiet period.
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Extended quiet period.
    #[must_use]
    pub const fn extended_quiet_period(&self) -> Duration {
        Duration::from_millis(self.extended_quiet_period_ms)
    }

    /// Event and hook wait.
    #[must_use]
    pub const fn event_wait(&self) -> Duration {
        Duration::from_millis(self.event_wait_ms)
    }
}

/// Log sink kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    Stderr,
    /// Append-only JSON lines file.
    File,
    /// Discard.
    #[default]
    None,
}

/// Log sink selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// File path for the file sink.
    #[serde(default)]
    pub path: Option<String>,
}

impl LoggingConfig {
    /// Validates logging settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.sink, &self.path) {
            (LogSinkKind::File, None) => {
                Err(ConfigError::Invalid("logging.path is required for file sink".to_string()))
            }
            (_, Some(path)) => validate_path_string("logging.path", path),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default bind host.
fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

/// Default max body.
const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default test-service URL.
fn default_service_url() -> String {
    "http://localhost:8000".to_string()
}

/// Default command timeout.
const fn default_command_timeout_ms() -> u64 {
    10_000
}

/// Default startup timeout.
const fn default_startup_timeout_ms() -> u64 {
    30_000
}

/// Default server key.
fn default_server_key() -> String {
    "sdk-key".to_string()
}

/// Default mobile key.
fn default_mobile_key() -> String {
    "mob-key".to_string()
}

/// Default client-side id.
fn default_client_side_id() -> String {
    "client-side-id".to_string()
}

/// Default connection wait.
const fn default_connection_ms() -> u64 {
    5_000
}

/// Default quiet period.
const fn default_quiet_period_ms() -> u64 {
    100
}

/// Default extended quiet period.
const fn default_extended_quiet_period_ms() -> u64 {
    1_000
}

/// Default event wait.
const fn default_event_wait_ms() -> u64 {
    5_000
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path; the flag reports whether it was given explicitly.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Ok(env_path) = env::var(HarnessEnv::ConfigPath.as_str()) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a millisecond timeout.
fn validate_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    if value > MAX_TIMEOUT_MS {
        return Err(ConfigError::Invalid(format!("{field} exceeds {MAX_TIMEOUT_MS}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
