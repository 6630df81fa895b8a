//! Task configuration: defaults, time-of-day windows and manifests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::serde::hms;

/// Concurrent execution slots when nothing is configured.
pub const DEFAULT_SPAWN: u32 = 1;
/// Execution timeout when nothing is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Allowed ready-but-unstarted slack when nothing is configured.
pub const DEFAULT_SLA: Duration = Duration::from_secs(5);
/// Burst window length when nothing is configured.
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
/// Runs per burst when nothing is configured.
pub const DEFAULT_MAX_RUNS: u32 = 1;
/// Pause after a run that reported no more work, when nothing is configured.
pub const DEFAULT_WAIT: Duration = Duration::ZERO;
/// Delay between registration and the first attempt, when nothing is configured.
pub const DEFAULT_DELAY_START: Duration = Duration::from_secs(5 * 60);
/// Upper bound of a time-of-day offset.
pub const END_OF_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Optional scheduling parameters, set either on a task or on one of its windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOverrides {
    /// Concurrent execution slots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn: Option<u32>,
    /// Maximum execution time before the worker is aborted.
    #[serde(default, with = "hms::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Maximum time a ready slot may wait for a worker.
    #[serde(default, with = "hms::option", skip_serializing_if = "Option::is_none")]
    pub sla: Option<Duration>,
    /// Length of one burst window.
    #[serde(default, with = "hms::option", skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<Duration>,
    /// Immediate re-runs allowed per burst window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Pause after a run that reported no more work.
    #[serde(default, with = "hms::option", skip_serializing_if = "Option::is_none")]
    pub wait: Option<Duration>,
}

impl ScheduleOverrides {
    /// Set the spawn count.
    #[must_use]
    pub const fn with_spawn(mut self, spawn: u32) -> Self {
        self.spawn = Some(spawn);
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the SLA slack.
    #[must_use]
    pub const fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = Some(sla);
        self
    }

    /// Set the burst window length.
    #[must_use]
    pub const fn with_time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = Some(time_unit);
        self
    }

    /// Set the runs allowed per burst.
    #[must_use]
    pub const fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Set the pause after an empty run.
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

/// Time-of-day window with its own parameter overrides.
///
/// Both bounds are inclusive offsets from local midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    /// First instant of the window.
    #[serde(with = "hms")]
    pub from: Duration,
    /// Last instant of the window.
    #[serde(with = "hms")]
    pub to: Duration,
    /// Parameters applied while the window is active.
    #[serde(flatten)]
    pub overrides: ScheduleOverrides,
}

impl ScheduleWindow {
    /// Window covering `[from, to]` with no overrides.
    #[must_use]
    pub fn new(from: Duration, to: Duration) -> Self {
        Self {
            from,
            to,
            overrides: ScheduleOverrides::default(),
        }
    }

    /// Replace the window overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ScheduleOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Whether a time-of-day offset falls inside the window.
    #[must_use]
    pub fn contains(&self, time_of_day: Duration) -> bool {
        self.from <= time_of_day && time_of_day <= self.to
    }
}

/// Configuration of one recurring task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Name the task factory is registered under.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Locale tag handed to the task body on every execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    /// Task-level parameters, used where a window leaves a field unset.
    #[serde(flatten)]
    pub defaults: ScheduleOverrides,
    /// Delay between registration and the first attempt.
    #[serde(default, with = "hms::option", skip_serializing_if = "Option::is_none")]
    pub delay_start: Option<Duration>,
    /// Windows sorted by `from`, non-overlapping.
    #[serde(default, rename = "schedules", skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<ScheduleWindow>,
    /// Opaque task settings handed to the task factory.
    #[serde(default, rename = "configuration", skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl TaskConfig {
    /// Configuration with no overrides and no windows.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            culture: None,
            defaults: ScheduleOverrides::default(),
            delay_start: None,
            windows: Vec::new(),
            settings: None,
        }
    }

    /// Replace the task-level defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: ScheduleOverrides) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the start delay.
    #[must_use]
    pub const fn with_delay_start(mut self, delay: Duration) -> Self {
        self.delay_start = Some(delay);
        self
    }

    /// Set the culture tag.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Append a window. Call [`TaskConfig::sort_windows`] if added out of order.
    #[must_use]
    pub fn with_window(mut self, window: ScheduleWindow) -> Self {
        self.windows.push(window);
        self
    }

    /// Set the opaque task settings.
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Effective start delay.
    #[must_use]
    pub fn delay_start(&self) -> Duration {
        self.delay_start.unwrap_or(DEFAULT_DELAY_START)
    }

    /// Order windows by start offset.
    pub fn sort_windows(&mut self) {
        self.windows.sort_by_key(|w| w.from);
    }

    /// Validate the configuration.
    ///
    /// Windows must be sorted and may touch but not overlap.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.type_name.trim().is_empty() {
            return Err("type must not be empty".into());
        }
        let mut previous: Option<&ScheduleWindow> = None;
        for window in &self.windows {
            let range = format!("{}-{}", hms::format(window.from), hms::format(window.to));
            if window.from > window.to {
                return Err(format!("schedule {range} ends before it starts"));
            }
            if window.to > END_OF_DAY {
                return Err(format!("schedule {range} extends past 24:00:00"));
            }
            if let Some(prev) = previous {
                if window.from < prev.from {
                    return Err(format!("schedule {range} is out of order"));
                }
                if window.from < prev.to {
                    return Err(format!("schedule {range} conflicts with another schedule"));
                }
            }
            previous = Some(window);
        }
        Ok(())
    }
}

/// A set of task configurations, as loaded by a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    /// Task configurations in declaration order.
    pub tasks: Vec<TaskConfig>,
}

impl TaskManifest {
    /// Validate every task.
    ///
    /// # Errors
    ///
    /// Returns the first failing task with its reason.
    pub fn validate(&self) -> Result<(), String> {
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate()
                .map_err(|e| format!("task #{index} `{}` invalid: {e}", task.type_name))?;
        }
        Ok(())
    }

    /// Parse a manifest from JSON, sort each task's windows and validate.
    ///
    /// # Errors
    ///
    /// Returns parse or validation errors.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let mut manifest: Self =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        for task in &mut manifest.tasks {
            task.sort_windows();
        }
        manifest.validate()?;
        Ok(manifest)
    }
}
