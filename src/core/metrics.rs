//! Metrics sink consumed by the supervisor.
//!
//! The supervisor only pushes counter updates; how they are exported is up to
//! the sink. `InMemoryMetrics` keeps lock-free atomics for hosts that poll,
//! and for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;

/// Counters and gauges published by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Worker threads currently in the pool.
    SpawnedThreads,
    /// Worker cap.
    MaxThreads,
    /// Execution slots owned by registered tasks.
    Tasks,
    /// Executions in progress.
    TasksRunning,
    /// Slots waiting in the ready queue.
    ScheduledTasks,
    /// Sum of execution times, in microseconds.
    AverageExecutionTime,
    /// Number of samples in [`Metric::AverageExecutionTime`].
    BaseAverageExecutionTime,
    /// Sum of start lags, in microseconds.
    AverageLagTime,
    /// Number of samples in [`Metric::AverageLagTime`].
    BaseAverageLagTime,
    /// Task body failures.
    TotalExceptions,
    /// Workers aborted for exceeding their timeout.
    TotalTimeouts,
    /// Task body failures, as a rate counter.
    ExceptionsPerSecond,
    /// Timeouts, as a rate counter.
    TimeoutsPerSecond,
}

impl Metric {
    /// Every metric, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::SpawnedThreads,
        Self::MaxThreads,
        Self::Tasks,
        Self::TasksRunning,
        Self::ScheduledTasks,
        Self::AverageExecutionTime,
        Self::BaseAverageExecutionTime,
        Self::AverageLagTime,
        Self::BaseAverageLagTime,
        Self::TotalExceptions,
        Self::TotalTimeouts,
        Self::ExceptionsPerSecond,
        Self::TimeoutsPerSecond,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SpawnedThreads => "spawned_threads",
            Self::MaxThreads => "max_threads",
            Self::Tasks => "tasks",
            Self::TasksRunning => "tasks_running",
            Self::ScheduledTasks => "scheduled_tasks",
            Self::AverageExecutionTime => "average_execution_time",
            Self::BaseAverageExecutionTime => "base_average_execution_time",
            Self::AverageLagTime => "average_lag_time",
            Self::BaseAverageLagTime => "base_average_lag_time",
            Self::TotalExceptions => "total_exceptions",
            Self::TotalTimeouts => "total_timeouts",
            Self::ExceptionsPerSecond => "exceptions_per_second",
            Self::TimeoutsPerSecond => "timeouts_per_second",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Destination for supervisor counters.
pub trait MetricsSink: Send + Sync {
    /// Overwrite the raw value.
    fn set(&self, metric: Metric, value: i64);
    /// Add one.
    fn increment(&self, metric: Metric) {
        self.increment_by(metric, 1);
    }
    /// Add `value`.
    fn increment_by(&self, metric: Metric, value: i64);
    /// Subtract one.
    fn decrement(&self, metric: Metric) {
        self.increment_by(metric, -1);
    }
    /// Release backend resources. Called once by `Supervisor::shutdown`.
    fn close(&self) {}
}

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set(&self, _metric: Metric, _value: i64) {}

    fn increment_by(&self, _metric: Metric, _value: i64) {}
}

/// Lock-free in-process counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    values: [AtomicI64; 13],
}

impl InMemoryMetrics {
    /// All counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `metric`.
    #[must_use]
    pub fn value(&self, metric: Metric) -> i64 {
        self.values[metric.index()].load(Ordering::Acquire)
    }

    /// Point-in-time copy of every counter, keyed by name.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot(
            Metric::ALL
                .iter()
                .map(|&m| (m.name(), self.value(m)))
                .collect(),
        )
    }
}

impl MetricsSink for InMemoryMetrics {
    fn set(&self, metric: Metric, value: i64) {
        self.values[metric.index()].store(value, Ordering::Release);
    }

    fn increment_by(&self, metric: Metric, value: i64) {
        self.values[metric.index()].fetch_add(value, Ordering::AcqRel);
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot(pub BTreeMap<&'static str, i64>);

impl MetricsSnapshot {
    /// Value recorded for `metric`.
    #[must_use]
    pub fn get(&self, metric: Metric) -> i64 {
        self.0.get(metric.name()).copied().unwrap_or(0)
    }
}
