//! Call-rate tracking over three nested windows, with adaptive tightening.
//!
//! Burst (60 s), medium (300 s) and long (3600 s) windows each carry a call
//! budget. When the running success rate degrades below the adaptive
//! threshold, the burst and medium budgets shrink proportionally — an
//! unreliable tool gets throttled earlier than a busy one. This store never
//! blocks; it recommends a delay and lets the host pipeline decide.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::ThrottleConfig;
use crate::error::Result;
use crate::lock::StateLock;
use crate::persistence::load_or_default;
use crate::persistence::save_json;
use crate::state_dir::StateDir;
use toolgate_protocol::Verdict;

/// One recorded call, ascending by timestamp in [`UsageState::calls`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: i64,
    pub tool: String,
    pub success: bool,
}

/// Persisted rate-window state (`api-usage.json`).
///
/// `calls` holds only entries inside the long window — older ones are pruned
/// at the start of every evaluation. The success/failure counters are
/// lifetime totals and survive pruning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageState {
    pub calls: Vec<CallRecord>,
    pub success_count: u64,
    pub failure_count: u64,
    /// Current doubling backoff, zeroed whenever no window is over budget.
    pub current_delay: u64,
    pub last_call: Option<i64>,
}

/// Occupancy and effective limits at evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub burst: usize,
    pub medium: usize,
    pub long: usize,
    pub burst_limit: u32,
    pub medium_limit: u32,
    pub long_limit: u32,
}

/// Outcome of one window evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThrottleAdvice {
    pub should_throttle: bool,
    /// Which window tripped, innermost first: `"burst limit"`,
    /// `"medium-term limit"` or `"long-term limit"`.
    pub reason: Option<&'static str>,
    pub suggested_delay_ms: i64,
    /// True when degraded success rate shrank the burst/medium budgets.
    pub adapted: bool,
    pub success_rate: f64,
    pub counts: WindowCounts,
}

/// Prune, count, adapt, judge the incoming call, then record it.
///
/// Pure over `state`; the incoming call is appended only after the windows
/// have been judged, so the Nth call is evaluated against the N-1 before it.
pub fn evaluate(
    state: &mut UsageState,
    tool: &str,
    succeeded: bool,
    now: DateTime<Utc>,
    config: &ThrottleConfig,
) -> ThrottleAdvice {
    let now_ms = now.timestamp_millis();

    // Invariant: nothing older than the long window survives to be counted.
    state.calls.retain(|c| now_ms - c.timestamp < config.long_window_ms);

    let counts_within =
        |window_ms: i64| state.calls.iter().filter(|c| now_ms - c.timestamp < window_ms).count();
    let burst = counts_within(config.burst_window_ms);
    let medium = counts_within(config.medium_window_ms);
    let long = state.calls.len();

    let total = state.success_count + state.failure_count;
    let success_rate = if total > 0 {
        state.success_count as f64 / total as f64
    } else {
        1.0
    };

    let mut burst_limit = config.burst_limit;
    let mut medium_limit = config.medium_limit;
    let mut adapted = false;
    if config.adaptive_enabled && success_rate < config.success_rate_threshold {
        let reduction = success_rate / config.success_rate_threshold;
        burst_limit = (f64::from(config.burst_limit) * reduction).floor() as u32;
        medium_limit = (f64::from(config.medium_limit) * reduction).floor() as u32;
        adapted = true;
    }

    // Innermost window first; the first one at or over budget wins.
    let hit: Option<(&'static str, i64)> = if burst >= burst_limit as usize {
        Some((
            "burst limit",
            slot_expiry_delay(&state.calls, now_ms, config.burst_window_ms, burst_limit),
        ))
    } else if medium >= medium_limit as usize {
        Some((
            "medium-term limit",
            slot_expiry_delay(&state.calls, now_ms, config.medium_window_ms, medium_limit),
        ))
    } else if long >= config.long_limit as usize {
        let oldest = state.calls.first().map_or(now_ms, |c| c.timestamp);
        Some(("long-term limit", (config.long_window_ms - (now_ms - oldest)).max(0)))
    } else {
        None
    };

    state.current_delay = if hit.is_some() {
        if state.current_delay == 0 {
            config.base_delay_ms
        } else {
            (state.current_delay * 2).min(config.max_delay_ms)
        }
    } else {
        0
    };

    let advice = ThrottleAdvice {
        should_throttle: hit.is_some(),
        reason: hit.map(|(reason, _)| reason),
        suggested_delay_ms: hit.map_or(0, |(_, delay)| delay),
        adapted,
        success_rate,
        counts: WindowCounts {
            burst,
            medium,
            long,
            burst_limit,
            medium_limit,
            long_limit: config.long_limit,
        },
    };

    state.calls.push(CallRecord {
        timestamp: now_ms,
        tool: tool.to_string(),
        success: succeeded,
    });
    if succeeded {
        state.success_count += 1;
    } else {
        state.failure_count += 1;
    }
    state.last_call = Some(now_ms);

    advice
}

/// Time until the call sitting `limit` entries from the end ages out of the
/// window — that expiry is what frees the next slot. A zero limit (fully
/// shrunk budget) degenerates to the oldest call still inside the window.
fn slot_expiry_delay(calls: &[CallRecord], now_ms: i64, window_ms: i64, limit: u32) -> i64 {
    let index = calls.len().saturating_sub(limit.max(1) as usize);
    let timestamp = calls.get(index).map_or(now_ms, |c| c.timestamp);
    (window_ms - (now_ms - timestamp)).max(0)
}

/// Read-only occupancy for the status dashboard; no pruning, no append.
pub fn occupancy(state: &UsageState, now: DateTime<Utc>, config: &ThrottleConfig) -> WindowCounts {
    let now_ms = now.timestamp_millis();
    let within = |window_ms: i64| {
        state
            .calls
            .iter()
            .filter(|c| now_ms - c.timestamp < window_ms)
            .count()
    };
    WindowCounts {
        burst: within(config.burst_window_ms),
        medium: within(config.medium_window_ms),
        long: within(config.long_window_ms),
        burst_limit: config.burst_limit,
        medium_limit: config.medium_limit,
        long_limit: config.long_limit,
    }
}

/// Disk-backed window tracker: lock → load → evaluate → save.
pub struct ThrottleStore {
    file: PathBuf,
    config: ThrottleConfig,
}

impl ThrottleStore {
    pub fn new(state: &StateDir, config: ThrottleConfig) -> Self {
        Self {
            file: state.usage_file(),
            config,
        }
    }

    /// Judge and record one call. Appends and persists on every activation,
    /// throttled or not.
    pub fn evaluate(&self, tool: &str, succeeded: bool, now: DateTime<Utc>) -> Result<Verdict> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = StateLock::acquire(&self.file)?;
        let mut usage: UsageState = load_or_default(&self.file)?;
        let advice = evaluate(&mut usage, tool, succeeded, now, &self.config);
        save_json(&self.file, &usage)?;

        tracing::debug!(
            burst = advice.counts.burst,
            burst_limit = advice.counts.burst_limit,
            medium = advice.counts.medium,
            medium_limit = advice.counts.medium_limit,
            long = advice.counts.long,
            long_limit = advice.counts.long_limit,
            "window occupancy"
        );

        Ok(render(&advice))
    }

    /// Read-only snapshot for the status dashboard.
    pub fn snapshot(&self) -> Result<UsageState> {
        load_or_default(&self.file)
    }
}

fn render(advice: &ThrottleAdvice) -> Verdict {
    let mut verdict = Verdict::allow();
    if advice.adapted {
        verdict.push(format!(
            "THROTTLE: Adaptive limit reduction (success rate: {:.1}%)",
            advice.success_rate * 100.0
        ));
    }
    if let Some(reason) = advice.reason {
        verdict.push(format!("THROTTLE: Rate limit approaching ({reason})"));
        verdict.push(format!(
            "THROTTLE: Suggested delay: {}s",
            (advice.suggested_delay_ms as u64).div_ceil(1000)
        ));
        verdict.push("HINT: Consider batching operations or using /clear to reduce context");
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + offset_ms).unwrap()
    }

    fn config() -> ThrottleConfig {
        ThrottleConfig::default()
    }

    fn state_with_calls(offsets_ms: &[i64], success: bool) -> UsageState {
        let mut state = UsageState::default();
        for &offset in offsets_ms {
            state.calls.push(CallRecord {
                timestamp: t0().timestamp_millis() + offset,
                tool: "Bash".to_string(),
                success,
            });
            if success {
                state.success_count += 1;
            } else {
                state.failure_count += 1;
            }
        }
        state
    }

    #[test]
    fn twenty_calls_in_the_burst_window_throttle_the_21st() {
        // 20 calls spread over the last 40 seconds.
        let offsets: Vec<i64> = (0..20).map(|i| -40_000 + i * 2_000).collect();
        let mut state = state_with_calls(&offsets, true);

        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert!(advice.should_throttle);
        assert_eq!(advice.reason, Some("burst limit"));
        assert_eq!(advice.counts.burst, 20);
        // Slot frees when the oldest of the last 20 (at -40 s) leaves the 60 s window.
        assert_eq!(advice.suggested_delay_ms, 20_000);
        assert_eq!(state.current_delay, 1_000);
        // The call was still recorded.
        assert_eq!(state.calls.len(), 21);
    }

    #[test]
    fn nineteen_calls_do_not_throttle() {
        let offsets: Vec<i64> = (0..19).map(|i| -40_000 + i * 2_000).collect();
        let mut state = state_with_calls(&offsets, true);
        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert!(!advice.should_throttle);
        assert_eq!(advice.reason, None);
        assert_eq!(state.current_delay, 0);
    }

    #[test]
    fn entries_past_the_long_window_are_pruned_before_counting() {
        let mut state = state_with_calls(&[-4_000_000, -3_700_000, -30_000], true);
        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        // Two of the three predate the 3600 s horizon.
        assert_eq!(advice.counts.long, 1);
        // Pruned entries are gone from the persisted sequence too (plus the
        // appended current call).
        assert_eq!(state.calls.len(), 2);
    }

    #[test]
    fn window_counts_are_nested_and_monotone() {
        let mut state = state_with_calls(&[-3_000_000, -200_000, -100_000, -30_000, -5_000], true);
        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert!(advice.counts.burst <= advice.counts.medium);
        assert!(advice.counts.medium <= advice.counts.long);
        assert_eq!(advice.counts.burst, 2);
        assert_eq!(advice.counts.medium, 4);
        assert_eq!(advice.counts.long, 5);
    }

    #[test]
    fn degraded_success_rate_shrinks_burst_and_medium_only() {
        // 1 success, 1 failure → rate 0.5, below the 0.8 threshold.
        let mut state = state_with_calls(&[-50_000], true);
        state.failure_count = 1;

        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert!(advice.adapted);
        // floor(20 * 0.5 / 0.8) = 12, floor(50 * 0.625) = 31.
        assert_eq!(advice.counts.burst_limit, 12);
        assert_eq!(advice.counts.medium_limit, 31);
        assert_eq!(advice.counts.long_limit, 200);
        assert!(advice.counts.burst_limit <= config().burst_limit);
        assert!(advice.counts.medium_limit <= config().medium_limit);
    }

    #[test]
    fn fully_degraded_rate_floors_limits_at_zero_not_below() {
        let mut state = UsageState {
            failure_count: 10,
            ..Default::default()
        };
        let advice = evaluate(&mut state, "Bash", false, t0(), &config());
        // Rate 0.0 → both effective limits are 0; zero calls in window still
        // meets the zero budget, so this throttles immediately.
        assert_eq!(advice.counts.burst_limit, 0);
        assert!(advice.should_throttle);
        assert_eq!(advice.reason, Some("burst limit"));
        assert!(advice.suggested_delay_ms >= 0);
    }

    #[test]
    fn success_rate_is_one_with_no_history() {
        let mut state = UsageState::default();
        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert_eq!(advice.success_rate, 1.0);
        assert!(!advice.adapted);
        assert!(!advice.should_throttle);
    }

    #[test]
    fn backoff_doubles_while_throttled_and_resets_when_clear() {
        let offsets: Vec<i64> = (0..20).map(|i| -20_000 + i * 500).collect();
        let mut state = state_with_calls(&offsets, true);

        evaluate(&mut state, "Bash", true, t0(), &config());
        assert_eq!(state.current_delay, 1_000);
        evaluate(&mut state, "Bash", true, at(100), &config());
        assert_eq!(state.current_delay, 2_000);
        evaluate(&mut state, "Bash", true, at(200), &config());
        assert_eq!(state.current_delay, 4_000);

        // An hour later every window has drained; the backoff resets.
        evaluate(&mut state, "Bash", true, at(3_700_000), &config());
        assert_eq!(state.current_delay, 0);
    }

    #[test]
    fn backoff_is_capped_at_the_ceiling() {
        let offsets: Vec<i64> = (0..20).map(|i| -20_000 + i * 500).collect();
        let mut state = state_with_calls(&offsets, true);
        state.current_delay = 30_000;
        evaluate(&mut state, "Bash", true, t0(), &config());
        assert_eq!(state.current_delay, 30_000);
    }

    #[test]
    fn medium_window_reports_when_burst_is_clear() {
        // 50 calls over the last 4 minutes, only a handful in the last minute.
        let offsets: Vec<i64> = (0..50).map(|i| -240_000 + i * 4_000).collect();
        let mut state = state_with_calls(&offsets, true);
        let advice = evaluate(&mut state, "Bash", true, t0(), &config());
        assert!(advice.should_throttle);
        assert_eq!(advice.reason, Some("medium-term limit"));
    }

    #[test]
    fn lifetime_counters_survive_pruning() {
        let mut state = state_with_calls(&[-4_000_000], true);
        assert_eq!(state.success_count, 1);
        evaluate(&mut state, "Bash", false, t0(), &config());
        // The pruned call's contribution to the totals remains.
        assert_eq!(state.success_count, 1);
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.last_call, Some(t0().timestamp_millis()));
    }

    #[test]
    fn render_includes_hint_and_delay_lines() {
        let advice = ThrottleAdvice {
            should_throttle: true,
            reason: Some("burst limit"),
            suggested_delay_ms: 1_500,
            ..Default::default()
        };
        let verdict = render(&advice);
        assert_eq!(
            verdict.advisories[0],
            "THROTTLE: Rate limit approaching (burst limit)"
        );
        assert_eq!(verdict.advisories[1], "THROTTLE: Suggested delay: 2s");
        assert!(verdict.advisories[2].starts_with("HINT:"));
        assert!(!verdict.decision.is_block());
    }
}
