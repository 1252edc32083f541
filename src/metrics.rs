//! Self-instrumentation for agent-checks.
//!
//! All metrics are prefixed with `agent_checks.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::sink::ServiceCheckStatus;

/// Record one completed poll.
pub fn record_poll(check: &'static str, result: PollResult, duration: std::time::Duration) {
    let result_str = match result {
        PollResult::Success => "success",
        PollResult::ConnectivityError => "connectivity_error",
        PollResult::ParseError => "parse_error",
        PollResult::Error => "error",
    };

    counter!("agent_checks.poll.count", "check" => check, "result" => result_str).increment(1);
    histogram!("agent_checks.poll.duration.seconds", "check" => check)
        .record(duration.as_secs_f64());
}

/// Poll outcome for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Poll completed and everything was emitted.
    Success,
    /// Target unreachable, timed out or returned an HTTP error.
    ConnectivityError,
    /// Target answered with a document that could not be parsed.
    ParseError,
    /// Any other failure.
    Error,
}

/// Record the outcome of one zone's master-sync verification.
pub fn record_zone_sync(status: ServiceCheckStatus, duration: std::time::Duration) {
    counter!("agent_checks.bind.zone_sync.count", "status" => status.as_str()).increment(1);
    histogram!("agent_checks.bind.zone_sync.duration.seconds").record(duration.as_secs_f64());
}

/// Record a serial-change event.
pub fn record_serial_change(kind: &'static str) {
    counter!("agent_checks.bind.serial_change.count", "kind" => kind).increment(1);
}

/// Record a counter that went backwards between two polls.
pub fn record_counter_reset() {
    counter!("agent_checks.bind.counter_reset.count").increment(1);
}

/// Record the number of instances tracked by the state store.
pub fn record_tracked_instances(count: usize) {
    gauge!("agent_checks.bind.instances.tracked").set(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
