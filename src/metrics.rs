//! Call telemetry
//!
//! Tracks token usage, estimated cost, call duration and response latency
//! across one process lifetime. Counters are cumulative across calls; the
//! duration clock freezes when a call ends and restarts on the next call.
//!
//! Usage payloads from the backend are authoritative when they carry totals;
//! otherwise the per-category counts are accumulated locally.

use std::time::{Duration, Instant};

use crate::transport::UsagePayload;

/// Cost per 1K input tokens (USD)
pub const TOKEN_COST_INPUT_PER_1K: f64 = 0.0006;

/// Cost per 1K output tokens (USD)
pub const TOKEN_COST_OUTPUT_PER_1K: f64 = 0.0024;

/// Minimum interval between status-line renders
const RENDER_DEBOUNCE: Duration = Duration::from_millis(100);

/// Estimate cost from token counts when the backend does not report one.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    input_tokens as f64 / 1000.0 * TOKEN_COST_INPUT_PER_1K
        + output_tokens as f64 / 1000.0 * TOKEN_COST_OUTPUT_PER_1K
}

/// Format a duration as mm:ss for the status line.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Accumulated telemetry for the process.
#[derive(Debug)]
pub struct UsageTracker {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_cost: f64,
    /// Whether any payload has carried an explicit cost; once one has, local
    /// estimates stop.
    cost_reported: bool,
    call_started_at: Option<Instant>,
    /// Duration of the last completed call, shown while idle
    frozen_duration: Option<Duration>,
    /// When the user last finished speaking, for response latency
    last_user_speech_at: Option<Instant>,
    last_render_at: Option<Instant>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            total_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_cost: 0.0,
            cost_reported: false,
            call_started_at: None,
            frozen_duration: None,
            last_user_speech_at: None,
            last_render_at: None,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Current call duration: live while in a call, frozen after it ends.
    pub fn call_duration(&self) -> Option<Duration> {
        self.call_started_at
            .map(|t| t.elapsed())
            .or(self.frozen_duration)
    }

    /// Fold one usage payload into the totals.
    pub fn apply(&mut self, usage: &UsagePayload) {
        match usage.total_tokens {
            // Backend totals are authoritative, but a zero total is a
            // placeholder, not a reset.
            Some(total) if total > 0 => self.total_tokens = total,
            _ => {
                let increment = usage.input() + usage.output() + usage.speech();
                self.total_tokens += increment;
            }
        }

        self.input_tokens += usage.input();
        self.output_tokens += usage.output();

        if let Some(cost) = usage.cost() {
            self.total_cost = cost;
            self.cost_reported = true;
        } else if !self.cost_reported {
            self.total_cost = estimate_cost(self.input_tokens, self.output_tokens);
        }

        log::debug!(
            "Usage: {} tokens total, est. ${:.4}",
            self.total_tokens,
            self.total_cost
        );
    }

    /// The user finished an utterance; starts the latency timer.
    pub fn note_user_transcript(&mut self) {
        self.last_user_speech_at = Some(Instant::now());
    }

    /// The agent responded; returns the latency since the user last spoke,
    /// once per utterance.
    pub fn note_agent_response(&mut self) -> Option<Duration> {
        let latency = self.last_user_speech_at.take().map(|t| t.elapsed());
        if let Some(l) = latency {
            log::debug!("Agent response latency: {}ms", l.as_millis());
        }
        latency
    }

    pub fn call_started(&mut self) {
        self.call_started_at = Some(Instant::now());
        self.frozen_duration = None;
    }

    pub fn call_ended(&mut self) {
        self.frozen_duration = self.call_started_at.take().map(|t| t.elapsed());
        self.last_user_speech_at = None;
    }

    /// Reset the per-call clock and latency state. Token and cost totals are
    /// cumulative and survive.
    pub fn reset(&mut self) {
        self.call_started_at = None;
        self.frozen_duration = None;
        self.last_user_speech_at = None;
    }

    /// Whether enough time has passed to re-render the status line. Updating
    /// on every payload would flood the terminal during fast streams.
    pub fn should_render(&mut self) -> bool {
        let now = Instant::now();
        match self.last_render_at {
            Some(last) if now.duration_since(last) < RENDER_DEBOUNCE => false,
            _ => {
                self.last_render_at = Some(now);
                true
            }
        }
    }

    /// One-line summary for the status display.
    pub fn status_line(&self) -> String {
        let duration = self
            .call_duration()
            .map(format_duration)
            .unwrap_or_else(|| "--:--".to_string());
        format!(
            "{} | {} tokens | ${:.4}",
            duration, self.total_tokens, self.total_cost
        )
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(input: u64, output: u64) -> UsagePayload {
        UsagePayload {
            input_tokens: Some(input),
            output_tokens: Some(output),
            ..Default::default()
        }
    }

    #[test]
    fn test_estimate_cost() {
        // 1000 input + 1000 output = $0.0006 + $0.0024
        let cost = estimate_cost(1000, 1000);
        assert!((cost - 0.003).abs() < 1e-9);

        assert_eq!(estimate_cost(0, 0), 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(61)), "01:01");
        assert_eq!(format_duration(Duration::from_secs(754)), "12:34");
    }

    #[test]
    fn test_apply_accumulates_categories() {
        let mut tracker = UsageTracker::new();
        tracker.apply(&payload(100, 50));
        tracker.apply(&payload(200, 150));

        assert_eq!(tracker.total_tokens(), 500);
        assert!((tracker.total_cost() - estimate_cost(300, 200)).abs() < 1e-9);
    }

    #[test]
    fn test_total_override_is_authoritative() {
        let mut tracker = UsageTracker::new();
        tracker.apply(&payload(100, 50));

        let mut with_total = payload(10, 10);
        with_total.total_tokens = Some(9999);
        tracker.apply(&with_total);

        assert_eq!(tracker.total_tokens(), 9999);
    }

    #[test]
    fn test_zero_total_does_not_reset_accumulation() {
        let mut tracker = UsageTracker::new();
        tracker.apply(&payload(100, 50));
        assert_eq!(tracker.total_tokens(), 150);

        // A payload with totalTokens: 0 falls back to increment semantics.
        let mut zero_total = payload(10, 0);
        zero_total.total_tokens = Some(0);
        tracker.apply(&zero_total);

        assert_eq!(tracker.total_tokens(), 160);
    }

    #[test]
    fn test_reported_cost_stops_estimation() {
        let mut tracker = UsageTracker::new();

        let mut with_cost = payload(100, 100);
        with_cost.estimated_cost_usd = Some(0.5);
        tracker.apply(&with_cost);
        assert_eq!(tracker.total_cost(), 0.5);

        // A later payload without a cost must not clobber the reported one
        // with a local estimate.
        tracker.apply(&payload(10, 10));
        assert_eq!(tracker.total_cost(), 0.5);
    }

    #[test]
    fn test_alternate_field_names() {
        let mut tracker = UsageTracker::new();
        let usage = UsagePayload {
            input_token_count: Some(100),
            output_token_count: Some(200),
            ..Default::default()
        };
        tracker.apply(&usage);
        assert_eq!(tracker.total_tokens(), 300);
    }

    #[test]
    fn test_speech_tokens_count_toward_total() {
        let mut tracker = UsageTracker::new();
        let usage = UsagePayload {
            input_tokens: Some(10),
            speech_tokens: Some(40),
            ..Default::default()
        };
        tracker.apply(&usage);
        assert_eq!(tracker.total_tokens(), 50);
    }

    #[test]
    fn test_call_duration_freezes_on_end() {
        let mut tracker = UsageTracker::new();
        assert!(tracker.call_duration().is_none());

        tracker.call_started();
        assert!(tracker.call_duration().is_some());

        tracker.call_ended();
        let frozen = tracker.call_duration().unwrap();
        std::thread::sleep(Duration::from_millis(15));
        // Frozen: does not keep counting.
        assert_eq!(tracker.call_duration().unwrap(), frozen);
    }

    #[test]
    fn test_latency_fires_once_per_utterance() {
        let mut tracker = UsageTracker::new();
        assert!(tracker.note_agent_response().is_none());

        tracker.note_user_transcript();
        assert!(tracker.note_agent_response().is_some());
        // Second response to the same utterance has no latency sample.
        assert!(tracker.note_agent_response().is_none());
    }

    #[test]
    fn test_totals_survive_reset() {
        let mut tracker = UsageTracker::new();
        tracker.apply(&payload(1000, 1000));
        tracker.call_started();
        tracker.reset();

        assert_eq!(tracker.total_tokens(), 2000);
        assert!(tracker.call_duration().is_none());
    }

    #[test]
    fn test_render_debounce() {
        let mut tracker = UsageTracker::new();
        assert!(tracker.should_render());
        assert!(!tracker.should_render());

        std::thread::sleep(Duration::from_millis(110));
        assert!(tracker.should_render());
    }
}
