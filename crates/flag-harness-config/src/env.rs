// crates/flag-harness-config/src/env.rs
// ============================================================================
// Module: Harness Environment
// Description: Environment-backed overrides for harness configuration.
// Purpose: Centralize env parsing with strict UTF-8 validation.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values are parsed with strict UTF-8 enforcement to avoid silent
//! misconfiguration. Invalid UTF-8, empty values, and malformed numbers fail
//! closed. Lookups go through a caller-supplied function so overrides can be
//! exercised without touching the process environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::time::Duration;

// ============================================================================
// SECTION: Environment Constants
// ============================================================================

/// Environment keys recognized by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessEnv {
    /// Config file path override.
    ConfigPath,
    /// Test-service URL override.
    ServiceUrl,
    /// Minimum wait timeout in milliseconds (positive integer).
    TimeoutMillis,
    /// Mock server bind host override.
    BindHost,
    /// Log file path; selects the file sink.
    LogPath,
}

impl HarnessEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigPath => "FLAG_HARNESS_CONFIG",
            Self::ServiceUrl => "FLAG_HARNESS_SERVICE_URL",
            Self::TimeoutMillis => "FLAG_HARNESS_TIMEOUT_MS",
            Self::BindHost => "FLAG_HARNESS_BIND_HOST",
            Self::LogPath => "FLAG_HARNESS_LOG_PATH",
        }
    }
}

// ============================================================================
// SECTION: Overrides
// ============================================================================

/// Typed overrides derived from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvOverrides {
    /// Test-service URL override.
    pub service_url: Option<String>,
    /// Minimum wait timeout.
    pub timeout: Option<Duration>,
    /// Bind host override.
    pub bind_host: Option<String>,
    /// Log file path.
    pub log_path: Option<String>,
}

impl EnvOverrides {
    /// Loads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a value is not valid UTF-8, is empty, or fails
    /// validation.
    pub fn load() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Loads overrides through an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error when a value is not valid UTF-8, is empty, or fails
    /// validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let read = |key: HarnessEnv| read_nonempty(key.as_str(), lookup(key.as_str()));
        let service_url = read(HarnessEnv::ServiceUrl)?;
        let timeout = read(HarnessEnv::TimeoutMillis)?
            .map(|value| parse_timeout_millis(HarnessEnv::TimeoutMillis.as_str(), &value))
            .transpose()?;
        let bind_host = read(HarnessEnv::BindHost)?;
        let log_path = read(HarnessEnv::LogPath)?;
        Ok(Self {
            service_url,
            timeout,
            bind_host,
            log_path,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Enforces UTF-8 validity and rejects empty values.
fn read_nonempty(name: &str, raw: Option<OsString>) -> Result<Option<String>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = raw.into_string().map_err(|_| format!("{name} must be valid UTF-8"))?;
    if value.trim().is_empty() {
        return Err(format!("{name} must not be empty"));
    }
    Ok(Some(value.trim().to_string()))
}

/// Parses a positive millisecond timeout.
fn parse_timeout_millis(name: &str, raw: &str) -> Result<Duration, String> {
    let millis: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{name} must be a positive integer number of milliseconds"))?;
    if millis == 0 {
        return Err(format!("{name} must be greater than zero"));
    }
    Ok(Duration::from_millis(millis))
}
