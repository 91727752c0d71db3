//! Governor configuration.
//!
//! Built-in defaults cover every knob; an optional `config.toml` next to the
//! state root can override any subset. Config is re-read on each activation
//! (activations are short-lived processes), and a malformed file falls back
//! to defaults with a warning — configuration must never be the reason a
//! tool call fails.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

/// Config file name, looked up under the project's `.toolgate/` directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Root configuration for all governor stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub circuit: CircuitConfig,
    pub throttle: ThrottleConfig,
    pub ingest: IngestConfig,
}

/// Circuit breaker thresholds and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open a CLOSED circuit.
    pub failure_threshold: u32,
    /// Consecutive successes that close a HALF_OPEN circuit.
    pub success_threshold: u32,
    /// How long an OPEN circuit rejects calls before probing, in milliseconds.
    pub open_timeout_ms: i64,
    /// Probe budget while HALF_OPEN before re-opening.
    pub half_open_max_attempts: u32,
}

/// Nested rate-window limits and backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub burst_window_ms: i64,
    pub burst_limit: u32,
    pub medium_window_ms: i64,
    pub medium_limit: u32,
    pub long_window_ms: i64,
    pub long_limit: u32,

    /// Seed for the doubling suggested-delay backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for the doubling backoff.
    pub max_delay_ms: u64,

    /// Shrink burst/medium limits when the running success rate drops below
    /// `success_rate_threshold`.
    pub adaptive_enabled: bool,
    pub success_rate_threshold: f64,
}

/// Event ingest settings for the hook binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How long to wait for the stdin payload before proceeding with an
    /// empty event, in milliseconds. The governor must never stall the host.
    pub stdin_timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout_ms: 30_000,
            half_open_max_attempts: 3,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            burst_window_ms: 60_000,
            burst_limit: 20,
            medium_window_ms: 300_000,
            medium_limit: 50,
            long_window_ms: 3_600_000,
            long_limit: 200,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            adaptive_enabled: true,
            success_rate_threshold: 0.8,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stdin_timeout_ms: 3_000,
        }
    }
}

impl GovernorConfig {
    /// Load the config file under `dir`, falling back to defaults.
    ///
    /// A missing file is the normal case. Anything else that goes wrong is
    /// logged and ignored.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("unreadable {}, using defaults: {e}", path.display());
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("malformed {}, using defaults: {e}", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = GovernorConfig::default();
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.success_threshold, 2);
        assert_eq!(config.circuit.open_timeout_ms, 30_000);
        assert_eq!(config.circuit.half_open_max_attempts, 3);
        assert_eq!(config.throttle.burst_limit, 20);
        assert_eq!(config.throttle.medium_limit, 50);
        assert_eq!(config.throttle.long_limit, 200);
        assert_eq!(config.throttle.success_rate_threshold, 0.8);
        assert_eq!(config.ingest.stdin_timeout_ms, 3_000);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "[circuit]\nfailure_threshold = 5\n",
        )
        .unwrap();
        let config = GovernorConfig::load(tmp.path());
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.success_threshold, 2);
        assert_eq!(config.throttle, ThrottleConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "circuit = 'nope").unwrap();
        assert_eq!(GovernorConfig::load(tmp.path()), GovernorConfig::default());
    }

    #[test]
    fn missing_file_is_silent_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(GovernorConfig::load(tmp.path()), GovernorConfig::default());
    }
}
