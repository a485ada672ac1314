//! Observability metrics for probe runs.
//!
//! Metrics go through the `metrics` crate facade. No recorder is installed
//! here; binaries that want an exporter install one at startup, and without
//! one every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tilecheck_units_total` | Counter | `state` | Units reaching a terminal state |
//! | `tilecheck_outcomes_total` | Counter | `outcome` | Assessments by outcome |
//! | `tilecheck_unit_duration_seconds` | Histogram | `state` | Wall-clock time per unit |
//! | `tilecheck_pages_total` | Counter | `result` | Pages processed or skipped |
//! | `tilecheck_persist_failures_total` | Counter | - | Result store writes that failed |
//! | `tilecheck_in_flight_units` | Gauge | - | Units currently holding a worker slot |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Units reaching a terminal state.
    pub const UNITS_TOTAL: &str = "tilecheck_units_total";
    /// Counter: Assessments by outcome.
    pub const OUTCOMES_TOTAL: &str = "tilecheck_outcomes_total";
    /// Histogram: Unit wall-clock duration in seconds.
    pub const UNIT_DURATION_SECONDS: &str = "tilecheck_unit_duration_seconds";
    /// Counter: Pages by result.
    pub const PAGES_TOTAL: &str = "tilecheck_pages_total";
    /// Counter: Failed result store writes.
    pub const PERSIST_FAILURES_TOTAL: &str = "tilecheck_persist_failures_total";
    /// Gauge: Units holding a worker slot.
    pub const IN_FLIGHT_UNITS: &str = "tilecheck_in_flight_units";
}

/// Label keys used across metrics.
pub mod labels {
    /// Terminal unit state (completed, timed_out, failed).
    pub const STATE: &str = "state";
    /// Outcome label, or `none`.
    pub const OUTCOME: &str = "outcome";
    /// Page result (processed, failed).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording run metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a unit reaching a terminal state and how long it took.
    pub fn record_unit(&self, state: &str, duration: Duration) {
        counter!(names::UNITS_TOTAL, labels::STATE => state.to_string()).increment(1);
        histogram!(names::UNIT_DURATION_SECONDS, labels::STATE => state.to_string())
            .record(duration.as_secs_f64());
    }

    /// Records an assessment outcome.
    pub fn record_outcome(&self, outcome: &str) {
        counter!(names::OUTCOMES_TOTAL, labels::OUTCOME => outcome.to_string()).increment(1);
    }

    /// Records a processed page.
    pub fn record_page_processed(&self) {
        counter!(names::PAGES_TOTAL, labels::RESULT => "processed").increment(1);
    }

    /// Records a page skipped because it could not be fetched.
    pub fn record_page_failed(&self) {
        counter!(names::PAGES_TOTAL, labels::RESULT => "failed").increment(1);
    }

    /// Records a failed result store write.
    pub fn record_persist_failure(&self) {
        counter!(names::PERSIST_FAILURES_TOTAL).increment(1);
    }

    /// Sets the number of units holding a worker slot.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_in_flight(&self, count: usize) {
        gauge!(names::IN_FLIGHT_UNITS).set(count as f64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_metrics_record_without_recorder() {
        // These calls should not panic even without a metrics recorder installed
        let metrics = FlowMetrics::new();
        metrics.record_unit("completed", Duration::from_millis(5));
        metrics.record_outcome("success");
        metrics.record_page_processed();
        metrics.record_page_failed();
        metrics.record_persist_failure();
        metrics.set_in_flight(3);
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded_duration = None;

        {
            let _guard = TimingGuard::new(|d| {
                recorded_duration = Some(d);
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(recorded_duration.is_some_and(|d| d >= Duration::from_millis(10)));
    }
}
