// crates/flag-harness-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for flag-harness-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::collections::HashMap;
use std::ffi::OsString;

use flag_harness_config::ConfigError;
use flag_harness_config::EnvOverrides;
use flag_harness_config::HarnessConfig;

/// Parses a TOML string into a `HarnessConfig` for tests.
pub fn config_from_toml(toml_str: &str) -> Result<HarnessConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<HarnessConfig, toml::de::Error> {
    config_from_toml("")
}

/// Builds overrides from a fixed set of variables.
pub fn overrides_from(pairs: &[(&str, &str)]) -> Result<EnvOverrides, String> {
    let vars: HashMap<String, OsString> =
        pairs.iter().map(|(name, value)| ((*name).to_string(), OsString::from(*value))).collect();
    EnvOverrides::from_lookup(|name| vars.get(name).cloned())
}

/// Asserts that a validation result failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> Result<(), String> {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
