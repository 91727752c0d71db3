//! Per-tool failure isolation (circuit breaker).
//!
//! # States
//!
//! ```text
//! CLOSED → OPEN:        failure_threshold consecutive failures
//! OPEN → HALF_OPEN:     open_timeout_ms elapsed; the triggering call
//!                       proceeds as a probe
//! HALF_OPEN → CLOSED:   success_threshold consecutive successes
//! HALF_OPEN → OPEN:     half_open_max_attempts probes spent on a failure
//! ```
//!
//! Only OPEN-before-timeout blocks; everything else is advisory. The
//! activation that pushes a CLOSED circuit over the threshold is still
//! judged under CLOSED rules, so blocking starts on the next call.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::CircuitConfig;
use crate::error::Result;
use crate::lock::StateLock;
use crate::persistence::load_or_default;
use crate::persistence::save_json;
use crate::state_dir::StateDir;
use toolgate_protocol::Verdict;

/// Breaker status for one tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitStatus {
    #[default]
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::Open => "OPEN",
            CircuitStatus::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Persisted per-tool record.
///
/// Field names and the epoch-millisecond timestamps match the on-disk
/// format the host runtime already has in the field, so existing state
/// files keep loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCircuit {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<i64>,
    pub opened_at: Option<i64>,
    pub half_open_attempts: u32,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// Tool name → circuit record, as serialized to `circuit-breaker-state.json`.
/// Records are created lazily on first sighting and never deleted.
pub type CircuitMap = BTreeMap<String, ToolCircuit>;

/// Apply one invocation result to a tool's record.
///
/// This is the whole transition table, pure over `record` — storage never
/// enters the picture, which is what keeps the state machine directly
/// unit-testable.
pub fn transition(
    record: &mut ToolCircuit,
    tool: &str,
    succeeded: bool,
    now: DateTime<Utc>,
    config: &CircuitConfig,
) -> Verdict {
    let now_ms = now.timestamp_millis();
    match record.status {
        CircuitStatus::Closed => {
            if succeeded {
                record.consecutive_failures = 0;
                record.consecutive_successes += 1;
                record.total_successes += 1;
                Verdict::allow()
            } else {
                record.consecutive_successes = 0;
                record.consecutive_failures += 1;
                record.total_failures += 1;
                record.last_failure = Some(now_ms);
                if record.consecutive_failures >= config.failure_threshold {
                    record.status = CircuitStatus::Open;
                    record.opened_at = Some(now_ms);
                    let mut verdict = Verdict::advisory(format!(
                        "CIRCUIT_BREAKER: {tool} circuit OPENED after {} failures",
                        record.consecutive_failures
                    ));
                    verdict.push(format!("DEGRADATION: Fallback mode activated for {tool}"));
                    verdict
                } else {
                    Verdict::allow()
                }
            }
        }
        CircuitStatus::Open => {
            let opened_at = record.opened_at.unwrap_or(now_ms);
            let elapsed = now_ms - opened_at;
            if elapsed >= config.open_timeout_ms {
                record.status = CircuitStatus::HalfOpen;
                record.half_open_attempts = 0;
                Verdict::advisory(format!(
                    "CIRCUIT_BREAKER: {tool} circuit moved to HALF-OPEN (probing)"
                ))
            } else {
                let remaining = config.open_timeout_ms - elapsed;
                let mut verdict = Verdict::block(remaining as u64);
                verdict.push(format!(
                    "CIRCUIT_BREAKER: {tool} circuit still OPEN. Retry in {}s",
                    (remaining as u64).div_ceil(1000)
                ));
                verdict.push(format!("BLOCKED: Tool {tool} is currently unavailable"));
                verdict
            }
        }
        CircuitStatus::HalfOpen => {
            record.half_open_attempts += 1;
            if succeeded {
                record.consecutive_successes += 1;
                record.consecutive_failures = 0;
                if record.consecutive_successes >= config.success_threshold {
                    record.status = CircuitStatus::Closed;
                    record.opened_at = None;
                    Verdict::advisory(format!("CIRCUIT_BREAKER: {tool} circuit CLOSED (recovered)"))
                } else {
                    Verdict::allow()
                }
            } else {
                record.consecutive_failures += 1;
                record.consecutive_successes = 0;
                record.total_failures += 1;
                if record.half_open_attempts >= config.half_open_max_attempts {
                    record.status = CircuitStatus::Open;
                    record.opened_at = Some(now_ms);
                    Verdict::advisory(format!(
                        "CIRCUIT_BREAKER: {tool} circuit re-OPENED after probe failures"
                    ))
                } else {
                    Verdict::allow()
                }
            }
        }
    }
}

/// Disk-backed circuit store: lock → load → transition → save.
pub struct CircuitStore {
    file: PathBuf,
    config: CircuitConfig,
}

impl CircuitStore {
    pub fn new(state: &StateDir, config: CircuitConfig) -> Self {
        Self {
            file: state.circuit_file(),
            config,
        }
    }

    /// Evaluate one invocation result for `tool` and persist the updated map.
    ///
    /// The map is re-persisted on every activation, blocked ones included —
    /// a block mutates nothing, but the write keeps the file's mtime a
    /// truthful "last evaluated" marker.
    pub fn evaluate(&self, tool: &str, succeeded: bool, now: DateTime<Utc>) -> Result<Verdict> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = StateLock::acquire(&self.file)?;
        let mut map: CircuitMap = load_or_default(&self.file)?;
        let record = map.entry(tool.to_string()).or_default();
        let verdict = transition(record, tool, succeeded, now, &self.config);
        save_json(&self.file, &map)?;
        Ok(verdict)
    }

    /// Read-only snapshot for the status dashboard.
    pub fn snapshot(&self) -> Result<CircuitMap> {
        load_or_default(&self.file)
    }
}
