//! # Prometheus Task Supervisor
//!
//! A supervisor for recurring background tasks running on a pool of dedicated
//! OS threads.
//!
//! Each registered task owns a number of execution slots. Workers claim slots
//! whose next attempt is due, run the task body and hand the outcome back. How
//! often a task runs, how many slots it owns and how long an execution may
//! take are governed by its schedule, which can change with the local time of
//! day.
//!
//! ## Key Features
//!
//! - **Time-of-day schedule windows**: window values override task-level
//!   values, which override built-in defaults
//! - **Bursts**: a body reporting more work is re-run immediately up to
//!   `maxRuns` times per `timeUnit`, then waits
//! - **SLA monitoring**: a background loop restores missing slots, adds workers
//!   when queued work is late and aborts executions past their timeout
//! - **Elastic worker pool**: idle workers retire, a floor of one worker is kept
//! - **Pluggable collaborators**: metrics sink, event log and clock
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_task_supervisor::config::{ScheduleOverrides, SupervisorConfig, TaskConfig};
//! use prometheus_task_supervisor::core::{ExecutionContext, InMemoryMetrics, Supervisor};
//!
//! let supervisor = Supervisor::new(SupervisorConfig::from_env());
//! supervisor.initialize(Arc::new(InMemoryMetrics::new()))?;
//!
//! let handle = supervisor.register_task(
//!     Arc::new(|ctx: &ExecutionContext| -> anyhow::Result<bool> {
//!         let pending = drain_outbox(ctx)?;
//!         Ok(pending > 0)
//!     }),
//!     TaskConfig::new("outbox")
//!         .with_defaults(ScheduleOverrides::default().with_spawn(2).with_wait(Duration::from_secs(30))),
//! )?;
//!
//! // later
//! supervisor.remove_task(&handle)?;
//! supervisor.shutdown()?;
//! ```
//!
//! Task manifests can be loaded from JSON and registered through a
//! [`core::TaskRegistry`] with [`builders::register_manifest`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling core: schedule resolution, burst state, workers and the supervisor.
pub mod core;
/// Configuration models for tasks and the supervisor.
pub mod config;
/// Builders wiring configuration into a running supervisor.
pub mod builders;
/// Shared utilities.
pub mod util;
