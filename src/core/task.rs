//! Task identity and the per-task burst state machine.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::schedule::EffectiveSchedule;
use crate::util::clock::add_duration;

/// Identifier assigned to a task at registration.
pub type TaskId = u64;

/// Handle to a registered task, used for removal and introspection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
}

impl TaskHandle {
    pub(crate) const fn new(id: TaskId, name: String) -> Self {
        Self { id, name }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task type name from its configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Mutable scheduling state of one task.
///
/// Owned by the supervisor task table and only touched under the task lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstState {
    /// Earliest instant a queued slot of this task may start.
    pub next_attempt: DateTime<Local>,
    /// Consecutive immediate re-runs in the current burst.
    pub burst_counter: u32,
    /// Instant the current burst began.
    pub burst_start: DateTime<Local>,
}

impl BurstState {
    /// State for a task whose first attempt is at `next_attempt`.
    #[must_use]
    pub const fn new(next_attempt: DateTime<Local>) -> Self {
        Self {
            next_attempt,
            burst_counter: 0,
            burst_start: next_attempt,
        }
    }

    /// Whether a slot of this task may start at `now`.
    #[must_use]
    pub fn is_ready(&self, now: &DateTime<Local>) -> bool {
        self.next_attempt <= *now
    }

    /// Record that an execution is starting; opens a new burst when none is in progress.
    pub fn begin_run(&mut self, now: DateTime<Local>) {
        if self.burst_counter == 0 {
            self.burst_start = now;
        }
    }

    /// Apply a completed execution and compute the next attempt.
    ///
    /// `schedule` must be resolved for `now`. Returns the new `next_attempt`.
    pub fn complete(
        &mut self,
        has_more_work: bool,
        schedule: &EffectiveSchedule,
        now: DateTime<Local>,
    ) -> DateTime<Local> {
        self.burst_counter = self.burst_counter.saturating_add(1);

        self.next_attempt = if !has_more_work {
            self.burst_counter = 0;
            add_duration(now, schedule.wait)
        } else if self.burst_counter < schedule.max_runs {
            now
        } else {
            self.burst_counter = 0;
            add_duration(self.burst_start, schedule.time_unit).max(now)
        };
        self.next_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::task::{ScheduleOverrides, TaskConfig};
    use crate::core::schedule::resolve;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn schedule(max_runs: u32, time_unit: u64, wait: u64) -> EffectiveSchedule {
        let cfg = TaskConfig::new("t").with_defaults(
            ScheduleOverrides::default()
                .with_max_runs(max_runs)
                .with_time_unit(secs(time_unit))
                .with_wait(secs(wait)),
        );
        resolve(&cfg, &t0())
    }

    #[test]
    fn test_burst_law() {
        let sched = schedule(3, 10, 2);
        let mut state = BurstState::new(t0());

        // Run 1 opens the burst and reports more work.
        state.begin_run(t0());
        let now = add_duration(t0(), secs(1));
        assert_eq!(state.complete(true, &sched, now), now);
        assert_eq!(state.burst_counter, 1);

        // Run 2, still in the same burst.
        state.begin_run(now);
        assert_eq!(state.burst_start, t0());
        let now = add_duration(t0(), secs(2));
        assert_eq!(state.complete(true, &sched, now), now);
        assert_eq!(state.burst_counter, 2);

        // Run 3 reports no more work: wait applies.
        state.begin_run(now);
        let now = add_duration(t0(), secs(3));
        assert_eq!(state.complete(false, &sched, now), add_duration(now, secs(2)));
        assert_eq!(state.burst_counter, 0);
    }

    #[test]
    fn test_exhausted_burst_waits_for_time_unit() {
        let sched = schedule(2, 10, 0);
        let mut state = BurstState::new(t0());

        state.begin_run(t0());
        state.complete(true, &sched, add_duration(t0(), secs(1)));
        state.begin_run(add_duration(t0(), secs(1)));
        let next = state.complete(true, &sched, add_duration(t0(), secs(2)));

        assert_eq!(next, add_duration(t0(), secs(10)));
        assert_eq!(state.burst_counter, 0);
    }

    #[test]
    fn test_exhausted_burst_past_time_unit_runs_now() {
        let sched = schedule(1, 10, 0);
        let mut state = BurstState::new(t0());

        state.begin_run(t0());
        let late = add_duration(t0(), secs(30));
        assert_eq!(state.complete(true, &sched, late), late);
    }

    #[test]
    fn test_new_burst_resets_start() {
        let sched = schedule(1, 10, 0);
        let mut state = BurstState::new(t0());
        state.begin_run(t0());
        state.complete(false, &sched, add_duration(t0(), secs(1)));

        let later = add_duration(t0(), secs(60));
        state.begin_run(later);
        assert_eq!(state.burst_start, later);
    }

    #[test]
    fn test_handle_display() {
        let handle = TaskHandle::new(7, "mailer".into());
        assert_eq!(handle.to_string(), "mailer#7");
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.name(), "mailer");
    }
}
