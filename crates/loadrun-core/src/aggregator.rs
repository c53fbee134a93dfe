//! Batch aggregation.
//!
//! The [`BatchRunner`] drives the executor over every planned run, strictly
//! one at a time and in order, and folds each outcome into a [`BatchResult`].
//! A failing run never stops the batch; only a shutdown signal does.

use crate::artifacts::{Clock, RunContext, RunOverrides, SystemClock, TimestampAllocator};
use crate::config::Config;
use crate::discovery::TestUnit;
use crate::executor::{Executor, RunOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Aggregated outcomes of a batch.
///
/// `passed + failed == total == outcomes().len()` holds for every value:
/// outcomes can only be added through [`BatchResult::record`].
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    outcomes: Vec<RunOutcome>,
    passed: usize,
    failed: usize,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an outcome and updates the counters.
    pub fn record(&mut self, outcome: RunOutcome) {
        if outcome.passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Folding form of [`record`](Self::record).
    pub fn with(mut self, outcome: RunOutcome) -> Self {
        self.record(outcome);
        self
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Outcomes in execution order.
    pub fn outcomes(&self) -> &[RunOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// True when no run failed. Vacuously true for an empty batch.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status for this batch.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_passed())
    }
}

impl FromIterator<RunOutcome> for BatchResult {
    fn from_iter<I: IntoIterator<Item = RunOutcome>>(iter: I) -> Self {
        iter.into_iter().fold(BatchResult::new(), BatchResult::with)
    }
}

impl Extend<RunOutcome> for BatchResult {
    fn extend<I: IntoIterator<Item = RunOutcome>>(&mut self, iter: I) {
        for outcome in iter {
            self.record(outcome);
        }
    }
}

/// A unit plus the per-run settings it is executed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRun {
    pub unit: TestUnit,
    pub tags: BTreeMap<String, String>,
    pub overrides: RunOverrides,
}

impl From<TestUnit> for PlannedRun {
    fn from(unit: TestUnit) -> Self {
        Self {
            unit,
            tags: BTreeMap::new(),
            overrides: RunOverrides::default(),
        }
    }
}

impl PlannedRun {
    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Errors that stop a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A shutdown signal arrived. Completed outcomes are kept.
    #[error("batch interrupted after {} of {planned} runs", .partial.total())]
    Interrupted {
        partial: BatchResult,
        planned: usize,
    },
}

/// Progress callback for batch execution updates.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted during batch execution.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The batch is about to start.
    BatchStarted { total: usize },

    /// A run is about to execute. `index` is zero-based.
    UnitStarted {
        index: usize,
        total: usize,
        test_name: String,
    },

    /// A run has completed.
    UnitCompleted {
        index: usize,
        total: usize,
        outcome: Box<RunOutcome>,
    },

    /// Every run has completed.
    BatchCompleted { result: BatchResult },
}

/// Runs planned units sequentially and aggregates their outcomes.
pub struct BatchRunner {
    executor: Executor,
    config: Config,
    clock: Arc<dyn Clock>,
    on_progress: Option<ProgressCallback>,
}

impl BatchRunner {
    pub fn new(executor: Executor, config: Config) -> Self {
        Self {
            executor,
            config,
            clock: Arc::new(SystemClock),
            on_progress: None,
        }
    }

    /// Replaces the clock used for run timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets a callback for progress updates.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Runs every planned run in order.
    pub async fn run<I>(&self, runs: I) -> Result<BatchResult, BatchError>
    where
        I: IntoIterator,
        I::Item: Into<PlannedRun>,
    {
        let runs: Vec<PlannedRun> = runs.into_iter().map(Into::into).collect();
        let total = runs.len();
        let mut timestamps = TimestampAllocator::new();
        let mut result = BatchResult::new();

        info!(total, "Starting batch");
        self.emit_progress(ProgressEvent::BatchStarted { total });

        for (index, planned) in runs.into_iter().enumerate() {
            self.emit_progress(ProgressEvent::UnitStarted {
                index,
                total,
                test_name: planned.unit.name.clone(),
            });

            let timestamp = timestamps.allocate(self.clock.now());
            let context = RunContext::new(planned.unit, timestamp, &self.config)
                .with_tags(planned.tags)
                .with_overrides(planned.overrides);

            match self.executor.execute(context).await {
                Ok(outcome) => {
                    self.emit_progress(ProgressEvent::UnitCompleted {
                        index,
                        total,
                        outcome: Box::new(outcome.clone()),
                    });
                    result.record(outcome);
                }
                // The executor folds every other error into the outcome.
                Err(e) => {
                    warn!(error = %e, completed = result.total(), total, "Batch interrupted");
                    return Err(BatchError::Interrupted {
                        partial: result,
                        planned: total,
                    });
                }
            }
        }

        info!(
            total = result.total(),
            passed = result.passed(),
            failed = result.failed(),
            "Batch completed"
        );
        self.emit_progress(ProgressEvent::BatchCompleted {
            result: result.clone(),
        });

        Ok(result)
    }

    /// Emits a progress event if a callback is registered.
    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}
