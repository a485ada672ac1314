//! Bounded parallel execution of classify+probe units.
//!
//! Each unit runs on its own task behind a semaphore permit. The executor
//! enforces the per-unit deadline itself: a unit that outlives it is aborted
//! and detached, its permit returns to the pool, and a `timeout` assessment is
//! recorded in its place. Units never need to check for cancellation.
//!
//! ## Unit states
//!
//! ```text
//! ┌───────────┐  permit   ┌─────────┐ ──► COMPLETED  (unit returned an assessment)
//! │ SUBMITTED │─────────► │ RUNNING │ ──► TIMED_OUT  (deadline passed; task aborted)
//! └───────────┘           └─────────┘ ──► FAILED     (unit errored or panicked)
//! ```
//!
//! Every terminal state yields exactly one [`Assessment`], so a batch of N
//! items always produces N reports.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::metrics::FlowMetrics;
use crate::model::{Assessment, WorkItem};
use crate::outcome::Outcome;
use tilecheck_core::observability::probe_span;

/// Lifecycle state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    /// Queued, waiting for a worker slot.
    Submitted,
    /// Holding a worker slot.
    Running,
    /// Returned an assessment.
    Completed,
    /// Exceeded the deadline and was abandoned.
    TimedOut,
    /// Returned an error or panicked.
    Failed,
}

impl UnitState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Failed)
    }

    /// Returns true if the transition to `target` is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Submitted => matches!(target, Self::Running),
            Self::Running => target.is_terminal(),
            Self::Completed | Self::TimedOut | Self::Failed => false,
        }
    }

    /// Moves to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the transition is not allowed.
    pub fn transition_to(self, target: Self) -> Result<Self> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_label().to_string(),
                to: target.as_label().to_string(),
                reason: "not an edge of the unit lifecycle".to_string(),
            })
        }
    }

    /// Returns a stable label for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// The terminal record of one unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// The scheduled item.
    pub item: WorkItem,
    /// Resulting assessment.
    pub assessment: Assessment,
    /// Terminal state.
    pub state: UnitState,
    /// Time spent holding a worker slot.
    pub elapsed: Duration,
}

/// Executor settings.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Maximum units holding a worker slot at once.
    pub concurrency: usize,
    /// Wall-clock deadline per unit, measured from slot acquisition.
    pub unit_timeout: Duration,
}

fn timed_out(item: &WorkItem, after: Duration) -> Assessment {
    Assessment::failed(
        item.concept_id(),
        Outcome::Timeout,
        format!("unit exceeded {}s deadline", after.as_secs_f64()),
    )
}

fn failed(item: &WorkItem, detail: impl Into<String>) -> Assessment {
    Assessment::failed(item.concept_id(), Outcome::FailedToExtract, detail)
}

/// Takes a lifecycle edge. An edge the lifecycle does not allow is an executor
/// bug: it asserts in debug builds, and otherwise is logged while the unit
/// keeps its current state.
fn advance(state: UnitState, next: UnitState) -> UnitState {
    debug_assert!(
        state.can_transition_to(next),
        "invalid unit transition {state} -> {next}"
    );
    state.transition_to(next).unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid unit state transition");
        state
    })
}

/// Runs one unit per item on a bounded pool and returns reports in completion order.
///
/// Items are admitted in input order. Results are not reordered.
pub async fn run<F, Fut>(items: Vec<WorkItem>, options: ExecutorOptions, unit_fn: F) -> Vec<UnitReport>
where
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Assessment>> + Send + 'static,
{
    let total = items.len();
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let unit_fn = Arc::new(unit_fn);
    let metrics = FlowMetrics::new();
    let mut set = JoinSet::new();

    for (index, item) in items.iter().cloned().enumerate() {
        let permits = Arc::clone(&permits);
        let in_flight = Arc::clone(&in_flight);
        let unit_fn = Arc::clone(&unit_fn);
        let span = probe_span(item.concept_id(), item.page_index);

        set.spawn(
            async move {
                let state = UnitState::Submitted;
                let Ok(_permit) = permits.acquire_owned().await else {
                    let assessment = failed(&item, "worker pool closed");
                    return (index, UnitReport { item, assessment, state: UnitState::Failed, elapsed: Duration::ZERO });
                };
                let state = advance(state, UnitState::Running);
                metrics.set_in_flight(in_flight.fetch_add(1, Ordering::SeqCst) + 1);
                tracing::debug!(%state, "unit started");

                let started = Instant::now();
                let mut handle = tokio::spawn(unit_fn(item.clone()).in_current_span());
                let (next, assessment) =
                    match tokio::time::timeout(options.unit_timeout, &mut handle).await {
                        Ok(Ok(Ok(assessment))) => (UnitState::Completed, assessment),
                        Ok(Ok(Err(e))) => {
                            tracing::warn!(error = %e, "unit failed");
                            (UnitState::Failed, failed(&item, e.to_string()))
                        }
                        Ok(Err(join_error)) => {
                            tracing::error!(error = %join_error, "unit panicked");
                            (UnitState::Failed, failed(&item, format!("unit panicked: {join_error}")))
                        }
                        Err(_) => {
                            handle.abort();
                            tracing::warn!(timeout_secs = options.unit_timeout.as_secs(), "unit timed out");
                            (UnitState::TimedOut, timed_out(&item, options.unit_timeout))
                        }
                    };
                let elapsed = started.elapsed();
                metrics.set_in_flight(in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1));

                let state = advance(state, next);
                metrics.record_unit(state.as_label(), elapsed);
                metrics.record_outcome(assessment.outcome_label());
                tracing::info!(%state, outcome = assessment.outcome_label(), elapsed_ms = elapsed.as_millis(), "unit finished");

                (index, UnitReport { item, assessment, state, elapsed })
            }
            .instrument(span),
        );
    }

    let mut reports = Vec::with_capacity(total);
    let mut reported = vec![false; total];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, report)) => {
                reported[index] = true;
                reports.push(report);
            }
            Err(e) => tracing::error!(error = %e, "unit wrapper task failed"),
        }
    }

    // A wrapper that died still owes its item a record.
    for (index, item) in items.into_iter().enumerate() {
        if !reported[index] {
            let assessment = failed(&item, "unit lost by executor");
            reports.push(UnitReport {
                item,
                assessment,
                state: UnitState::Failed,
                elapsed: Duration::ZERO,
            });
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CollectionRef;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(0, CollectionRef::new(format!("C{i}-P"))))
            .collect()
    }

    fn options(concurrency: usize, timeout_ms: u64) -> ExecutorOptions {
        ExecutorOptions {
            concurrency,
            unit_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn unit_state_transitions() {
        assert!(UnitState::Submitted.can_transition_to(UnitState::Running));
        assert!(!UnitState::Submitted.can_transition_to(UnitState::Completed));
        assert!(UnitState::Running.can_transition_to(UnitState::TimedOut));
        assert!(!UnitState::Completed.can_transition_to(UnitState::Running));
        assert!(UnitState::Failed.transition_to(UnitState::Running).is_err());
    }

    #[test]
    fn advance_follows_lifecycle_edges() {
        let running = advance(UnitState::Submitted, UnitState::Running);
        assert_eq!(running, UnitState::Running);
        assert_eq!(advance(running, UnitState::TimedOut), UnitState::TimedOut);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid unit transition completed -> running")]
    fn advance_rejects_invalid_edge() {
        let _ = advance(UnitState::Completed, UnitState::Running);
    }

    #[tokio::test]
    async fn every_item_gets_one_report() {
        let reports = run(items(10), options(3, 1_000), |item: WorkItem| async move {
            Ok(Assessment::new(item.concept_id()).with_outcome(Outcome::Success, None))
        })
        .await;
        assert_eq!(reports.len(), 10);
        assert!(reports.iter().all(|r| r.state == UnitState::Completed));
    }

    #[tokio::test]
    async fn errors_and_panics_become_failed() {
        let reports = run(items(3), options(3, 1_000), |item: WorkItem| async move {
            match item.concept_id() {
                "C0-P" => Err(Error::catalog("boom")),
                "C1-P" => panic!("unit blew up"),
                _ => Ok(Assessment::new(item.concept_id())),
            }
        })
        .await;
        assert_eq!(reports.len(), 3);
        let failed: Vec<_> = reports
            .iter()
            .filter(|r| r.state == UnitState::Failed)
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .all(|r| r.assessment.outcome == Some(Outcome::FailedToExtract)));
    }

    #[tokio::test]
    async fn stuck_unit_times_out_and_frees_its_slot() {
        // One slot: the stuck unit must release it for the others to run.
        let reports = run(items(3), options(1, 50), |item: WorkItem| async move {
            if item.concept_id() == "C0-P" {
                std::future::pending::<()>().await;
            }
            Ok(Assessment::new(item.concept_id()).with_outcome(Outcome::Success, None))
        })
        .await;

        assert_eq!(reports.len(), 3);
        let timed_out: Vec<_> = reports
            .iter()
            .filter(|r| r.state == UnitState::TimedOut)
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].assessment.outcome, Some(Outcome::Timeout));
        assert_eq!(timed_out[0].assessment.collection_concept_id, "C0-P");
        assert_eq!(
            reports
                .iter()
                .filter(|r| r.assessment.outcome == Some(Outcome::Success))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let reports = run(items(12), options(4, 5_000), move |item: WorkItem| {
            let active = Arc::clone(&a);
            let peak = Arc::clone(&p);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Assessment::new(item.concept_id()))
            }
        })
        .await;

        assert_eq!(reports.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn empty_batch() {
        let reports = run(Vec::new(), options(2, 10), |item: WorkItem| async move {
            Ok(Assessment::new(item.concept_id()))
        })
        .await;
        assert!(reports.is_empty());
    }
}
