//! Provider configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// What to do when a subscriber panics or stored data cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and carry on as if the value were absent.
    #[default]
    LogAndContinue,
    /// Return the failure to the caller.
    Propagate,
}

impl FailurePolicy {
    pub fn propagates(self) -> bool {
        matches!(self, FailurePolicy::Propagate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Prepended to persisted keys as `prefix-key`.
    pub storage_prefix: Option<String>,
    /// Default debounce delay for hooks that don't set one.
    pub debounce_ms: u64,
    pub failure_policy: FailurePolicy,
    /// Directory name used by [`detect_backend`](crate::storage::detect_backend).
    pub app_name: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            storage_prefix: None,
            debounce_ms: 500,
            failure_policy: FailurePolicy::default(),
            app_name: "slotstate".to_string(),
        }
    }
}

impl StateConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, StateError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// `debounce_ms` as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = StateConfig::from_toml_str("").unwrap();
        assert_eq!(config, StateConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(500));
    }

    #[test]
    fn toml_overrides() {
        let config = StateConfig::from_toml_str(
            r#"
            storage_prefix = "app"
            debounce_ms = 100
            failure_policy = "propagate"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage_prefix.as_deref(), Some("app"));
        assert_eq!(config.debounce_ms, 100);
        assert!(config.failure_policy.propagates());
        assert_eq!(config.app_name, "slotstate");
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = StateConfig::from_toml_str("debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, StateError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "debounce_ms = 42\n").unwrap();
        assert_eq!(StateConfig::load(&path).unwrap().debounce_ms, 42);
    }
}
