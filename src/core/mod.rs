//! Scheduling core: schedule resolution, burst state, workers and the supervisor.

pub mod cancel;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod supervisor;
pub mod task;
pub mod worker_pool;

pub use cancel::CancellationToken;
pub use error::{AppResult, SupervisorError, TaskUnavailable};
pub use event_log::{EventLog, InMemoryEventLog, LogEntry, TracingEventLog};
#[cfg(feature = "tokio-runtime")]
pub use executor::{AsyncBody, AsyncTaskBody};
pub use executor::{ExecutionContext, TaskBody};
pub use metrics::{InMemoryMetrics, Metric, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use queue::ReadyQueue;
pub use registry::TaskRegistry;
pub use schedule::{resolve, resolve_time_of_day, EffectiveSchedule};
pub use supervisor::{SlotCounts, Supervisor};
pub use task::{BurstState, TaskHandle, TaskId};
pub use worker_pool::WorkerId;
