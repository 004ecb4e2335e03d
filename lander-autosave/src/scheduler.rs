//! Auto-save scheduling state: when a save may start, what happened to the
//! last one, and how long to wait after failures.
//!
//! ```text
//!            begin_save            finish_success
//!   idle ───────────────► saving ─────────────────► saved   (backoff reset)
//!     ▲                      │
//!     │                      │ finish_failure
//!     │                      ▼
//!     └───── retry_at ◄── errored   (delay = min(base·2^(n-1), max))
//! ```
//!
//! The scheduler holds no document data and performs no I/O; the session
//! drives it around gateway calls.

use std::time::Duration;

use lander_core::ChangeEvent;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::AutoSaveConfig;
use crate::error::EngineError;

/// Save timing telemetry. Times are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub save_count: u64,
    pub average_save_time: f64,
    pub last_save_time: u64,
    pub failed_saves: u64,
}

impl PerformanceStats {
    fn record_success(&mut self, duration_ms: u64) {
        self.save_count += 1;
        let n = self.save_count as f64;
        self.average_save_time += (duration_ms as f64 - self.average_save_time) / n;
        self.last_save_time = duration_ms;
    }
}

/// Point-in-time view of the auto-save state for UI and callers.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoSaveState {
    pub is_dirty: bool,
    pub is_saving: bool,
    pub is_online: bool,
    pub auto_save_enabled: bool,
    /// Wall-clock ms of the last successful save.
    pub last_saved: Option<u64>,
    pub save_error: Option<EngineError>,
    pub queued_changes: Vec<ChangeEvent>,
    pub performance: PerformanceStats,
    pub consecutive_failures: u32,
    pub has_active_conflicts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Red,
    Gray,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveStatus {
    pub message: String,
    pub color: StatusColor,
}

impl SaveStatus {
    pub fn from_state(state: &AutoSaveState, now_ms: u64) -> Self {
        Self {
            message: status_message(state, now_ms),
            color: status_color(state),
        }
    }
}

fn status_message(state: &AutoSaveState, now_ms: u64) -> String {
    if let Some(err) = &state.save_error {
        return format!("Save failed: {err}");
    }
    if state.is_saving {
        return "Saving...".to_string();
    }
    if state.has_active_conflicts {
        return "Conflict - resolve to resume saving".to_string();
    }
    if !state.is_online {
        return "Offline - changes will save when online".to_string();
    }
    if state.is_dirty {
        return "Unsaved changes".to_string();
    }
    match state.last_saved {
        Some(at) => {
            let ago = now_ms.saturating_sub(at);
            if ago < 60_000 {
                "Saved just now".to_string()
            } else if ago < 3_600_000 {
                format!("Saved {}m ago", ago / 60_000)
            } else {
                format!("Saved {}h ago", ago / 3_600_000)
            }
        }
        None => "No changes yet".to_string(),
    }
}

fn status_color(state: &AutoSaveState) -> StatusColor {
    if state.save_error.is_some() || state.has_active_conflicts {
        StatusColor::Red
    } else if state.is_saving {
        StatusColor::Yellow
    } else if !state.is_online {
        StatusColor::Gray
    } else if state.is_dirty {
        StatusColor::Yellow
    } else {
        StatusColor::Green
    }
}

/// Capped exponential backoff between automatic retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
            retry_at: None,
        }
    }

    /// Delay after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Register a failure at `at`; returns the wait before the next retry.
    pub fn record_failure(&mut self, at: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay_for(self.failures);
        self.retry_at = Some(at + delay);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn is_waiting(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }
}

#[derive(Debug)]
pub struct SaveScheduler {
    enabled: bool,
    debounce: Duration,
    debounce_deadline: Option<Instant>,
    in_flight: usize,
    last_saved: Option<u64>,
    save_error: Option<EngineError>,
    stats: PerformanceStats,
    backoff: Backoff,
}

impl SaveScheduler {
    pub fn new(config: &AutoSaveConfig) -> Self {
        Self {
            enabled: config.enabled,
            debounce: Duration::from_millis(config.debounce_ms),
            debounce_deadline: None,
            in_flight: 0,
            last_saved: None,
            save_error: None,
            stats: PerformanceStats::default(),
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            log::info!("Auto-save {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
        if !enabled {
            self.debounce_deadline = None;
        }
    }

    /// Request an opportunistic save after the debounce window. Returns
    /// `false` (and schedules nothing) when disabled or offline.
    pub fn request(&mut self, online: bool, now: Instant) -> bool {
        if !self.enabled || !online {
            return false;
        }
        self.debounce_deadline = Some(now + self.debounce);
        true
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    /// Clear the debounce deadline if it has passed.
    pub fn take_due_debounce(&mut self, now: Instant) -> bool {
        match self.debounce_deadline {
            Some(at) if at <= now => {
                self.debounce_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Whether an automatic save may start now.
    pub fn should_attempt(&self, dirty: bool, online: bool, now: Instant) -> bool {
        self.enabled && dirty && online && !self.is_saving() && !self.backoff.is_waiting(now)
    }

    pub fn begin_save(&mut self) {
        self.in_flight += 1;
        self.debounce_deadline = None;
    }

    pub fn finish_success(&mut self, saved_at_ms: u64, duration_ms: u64) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.last_saved = Some(self.last_saved.map_or(saved_at_ms, |prev| prev.max(saved_at_ms)));
        self.save_error = None;
        self.stats.record_success(duration_ms);
        self.backoff.reset();
    }

    /// Returns the delay before the next automatic retry.
    pub fn finish_failure(&mut self, error: EngineError, at: Instant) -> Duration {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.stats.failed_saves += 1;
        self.save_error = Some(error);
        self.backoff.record_failure(at)
    }

    /// End an attempt that never reached the gateway (aborted by a conflict).
    pub fn abort_save(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Connectivity returned: retry without waiting out the backoff.
    pub fn on_online(&mut self) {
        self.backoff.reset();
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight > 0
    }

    pub fn last_saved(&self) -> Option<u64> {
        self.last_saved
    }

    pub fn save_error(&self) -> Option<&EngineError> {
        self.save_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.save_error = None;
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = PerformanceStats::default();
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> SaveScheduler {
        SaveScheduler::new(&AutoSaveConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            ..AutoSaveConfig::default()
        })
    }

    fn state() -> AutoSaveState {
        AutoSaveState {
            is_dirty: false,
            is_saving: false,
            is_online: true,
            auto_save_enabled: true,
            last_saved: None,
            save_error: None,
            queued_changes: Vec::new(),
            performance: PerformanceStats::default(),
            consecutive_failures: 0,
            has_active_conflicts: false,
        }
    }

    #[test]
    fn test_backoff_is_capped_exponential() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        let delays: Vec<u64> = (1..=6).map(|n| backoff.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_average_is_incremental() {
        let mut s = scheduler();
        for ms in [100, 200, 300] {
            s.begin_save();
            s.finish_success(1, ms);
        }
        assert_eq!(s.stats().save_count, 3);
        assert!((s.stats().average_save_time - 200.0).abs() < f64::EPSILON);
        assert_eq!(s.stats().last_save_time, 300);
    }

    #[test]
    fn test_last_saved_never_moves_back() {
        let mut s = scheduler();
        s.begin_save();
        s.finish_success(2_000, 10);
        s.begin_save();
        s.finish_success(1_500, 10);
        assert_eq!(s.last_saved(), Some(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_blocks_attempts_until_retry_at() {
        let mut s = scheduler();
        let now = Instant::now();
        s.begin_save();
        assert!(!s.should_attempt(true, true, now));

        let delay = s.finish_failure(EngineError::SaveFailure("boom".into()), now);
        assert_eq!(delay, Duration::from_secs(1));
        assert_eq!(s.stats().failed_saves, 1);
        assert!(!s.should_attempt(true, true, now + Duration::from_millis(999)));
        assert!(s.should_attempt(true, true, now + Duration::from_secs(1)));

        s.begin_save();
        s.finish_success(5, 10);
        assert!(s.save_error().is_none());
        assert_eq!(s.backoff().failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_resets_backoff() {
        let mut s = scheduler();
        let now = Instant::now();
        s.begin_save();
        s.finish_failure(EngineError::SaveFailure("x".into()), now);
        assert!(s.backoff().is_waiting(now));
        s.on_online();
        assert!(s.should_attempt(true, true, now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_noops_when_disabled_or_offline() {
        let mut s = scheduler();
        let now = Instant::now();
        assert!(!s.request(false, now));
        assert!(s.debounce_deadline().is_none());

        s.set_enabled(false);
        assert!(!s.request(true, now));
        assert!(!s.should_attempt(true, true, now));

        s.set_enabled(true);
        assert!(s.request(true, now));
        assert!(!s.take_due_debounce(now));
        assert!(s.take_due_debounce(now + Duration::from_millis(500)));
        assert!(s.debounce_deadline().is_none());
    }

    #[test]
    fn test_status_messages() {
        let mut st = state();
        assert_eq!(SaveStatus::from_state(&st, 0).message, "No changes yet");

        st.last_saved = Some(0);
        assert_eq!(SaveStatus::from_state(&st, 30_000).message, "Saved just now");
        assert_eq!(SaveStatus::from_state(&st, 5 * 60_000).message, "Saved 5m ago");
        assert_eq!(SaveStatus::from_state(&st, 0).color, StatusColor::Green);

        st.is_dirty = true;
        assert_eq!(SaveStatus::from_state(&st, 0).message, "Unsaved changes");
        assert_eq!(SaveStatus::from_state(&st, 0).color, StatusColor::Yellow);

        st.is_online = false;
        let status = SaveStatus::from_state(&st, 0);
        assert_eq!(status.message, "Offline - changes will save when online");
        assert_eq!(status.color, StatusColor::Gray);

        st.save_error = Some(EngineError::OfflineRejection);
        let status = SaveStatus::from_state(&st, 0);
        assert_eq!(status.message, "Save failed: Cannot save while offline");
        assert_eq!(status.color, StatusColor::Red);
    }
}
