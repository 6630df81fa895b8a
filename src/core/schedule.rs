//! Schedule resolution: which parameters apply to a task at a given instant.
//!
//! Precedence is window > task > global default. Resolution is pure and
//! takes no locks, so it is recomputed at every decision point instead of
//! being cached across window boundaries.

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::task::{
    ScheduleOverrides, TaskConfig, DEFAULT_MAX_RUNS, DEFAULT_SLA, DEFAULT_SPAWN, DEFAULT_TIMEOUT,
    DEFAULT_TIME_UNIT, DEFAULT_WAIT, END_OF_DAY,
};
use crate::util::clock::time_of_day;

/// Fully resolved scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveSchedule {
    /// Start of the matched window (midnight for the synthetic full-day window).
    pub from: Duration,
    /// End of the matched window (24:00:00 for the synthetic window).
    pub to: Duration,
    /// Concurrent execution slots.
    pub spawn: u32,
    /// Execution timeout.
    pub timeout: Duration,
    /// Ready-but-unstarted slack.
    pub sla: Duration,
    /// Burst window length.
    pub time_unit: Duration,
    /// Runs per burst window.
    pub max_runs: u32,
    /// Pause after an empty run.
    pub wait: Duration,
}

/// Resolve the schedule for `config` at `at`.
#[must_use]
pub fn resolve(config: &TaskConfig, at: &DateTime<Local>) -> EffectiveSchedule {
    resolve_time_of_day(config, time_of_day(at))
}

/// Resolve the schedule for `config` at an offset from midnight.
#[must_use]
pub fn resolve_time_of_day(config: &TaskConfig, time_of_day: Duration) -> EffectiveSchedule {
    let empty = ScheduleOverrides::default();
    let (from, to, window) = config
        .windows
        .iter()
        .find(|w| w.contains(time_of_day))
        .map_or((Duration::ZERO, END_OF_DAY, &empty), |w| {
            (w.from, w.to, &w.overrides)
        });
    let task = &config.defaults;

    EffectiveSchedule {
        from,
        to,
        spawn: window.spawn.or(task.spawn).unwrap_or(DEFAULT_SPAWN),
        timeout: window.timeout.or(task.timeout).unwrap_or(DEFAULT_TIMEOUT),
        sla: window.sla.or(task.sla).unwrap_or(DEFAULT_SLA),
        time_unit: window.time_unit.or(task.time_unit).unwrap_or(DEFAULT_TIME_UNIT),
        max_runs: window.max_runs.or(task.max_runs).unwrap_or(DEFAULT_MAX_RUNS),
        wait: window.wait.or(task.wait).unwrap_or(DEFAULT_WAIT),
    }
}
