//! Supervisor settings: pool cap and loop timings.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard cap on worker threads when nothing is configured.
pub const DEFAULT_MAX_WORKERS: usize = 200;

/// Load a `.env` file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime settings of a [`Supervisor`](crate::core::Supervisor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Maximum number of worker threads.
    pub max_workers: usize,
    /// Period of the SLA monitor loop, in milliseconds.
    pub sla_tick_ms: u64,
    /// Time without claimed work after which a worker retires, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Sleep between readiness scans of an idle worker, in milliseconds.
    pub idle_poll_ms: u64,
    /// Pause of a worker after each completed execution, in milliseconds.
    pub post_run_pause_ms: u64,
    /// How long shutdown waits for each thread before detaching it, in milliseconds.
    pub join_timeout_ms: u64,
    /// Stack size of worker threads; platform default when unset.
    pub thread_stack_size: Option<usize>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            sla_tick_ms: 1000,
            idle_timeout_ms: 5000,
            idle_poll_ms: 250,
            post_run_pause_ms: 100,
            join_timeout_ms: 2000,
            thread_stack_size: None,
        }
    }
}

impl SupervisorConfig {
    /// Default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings from `TASK_SUPERVISOR_*` environment variables (call
    /// [`load_dotenv`] first). Unset or unparsable values keep their default.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: env_parse("TASK_SUPERVISOR_MAX_WORKERS", defaults.max_workers),
            sla_tick_ms: env_parse("TASK_SUPERVISOR_SLA_TICK_MS", defaults.sla_tick_ms),
            idle_timeout_ms: env_parse("TASK_SUPERVISOR_IDLE_TIMEOUT_MS", defaults.idle_timeout_ms),
            idle_poll_ms: env_parse("TASK_SUPERVISOR_IDLE_POLL_MS", defaults.idle_poll_ms),
            post_run_pause_ms: env_parse(
                "TASK_SUPERVISOR_POST_RUN_PAUSE_MS",
                defaults.post_run_pause_ms,
            ),
            join_timeout_ms: env_parse("TASK_SUPERVISOR_JOIN_TIMEOUT_MS", defaults.join_timeout_ms),
            thread_stack_size: env::var("TASK_SUPERVISOR_THREAD_STACK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Parse settings from JSON and validate. Missing fields keep their default.
    ///
    /// # Errors
    ///
    /// Returns parse or validation errors.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Set the worker cap.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the SLA loop period.
    #[must_use]
    pub const fn with_sla_tick(mut self, tick: Duration) -> Self {
        self.sla_tick_ms = saturating_ms(tick);
        self
    }

    /// Set the idle retirement threshold.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = saturating_ms(timeout);
        self
    }

    /// Set the idle polling interval.
    #[must_use]
    pub const fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll_ms = saturating_ms(poll);
        self
    }

    /// Set the pause after each execution.
    #[must_use]
    pub const fn with_post_run_pause(mut self, pause: Duration) -> Self {
        self.post_run_pause_ms = saturating_ms(pause);
        self
    }

    /// Set the per-thread join timeout used at shutdown.
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = saturating_ms(timeout);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = Some(size);
        self
    }

    /// SLA loop period.
    #[must_use]
    pub const fn sla_tick(&self) -> Duration {
        Duration::from_millis(self.sla_tick_ms)
    }

    /// Idle retirement threshold.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Idle polling interval.
    #[must_use]
    pub const fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Pause after each execution.
    #[must_use]
    pub const fn post_run_pause(&self) -> Duration {
        Duration::from_millis(self.post_run_pause_ms)
    }

    /// Per-thread join timeout.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Validate settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.sla_tick_ms == 0 {
            return Err("sla_tick_ms must be greater than 0".into());
        }
        if self.idle_poll_ms == 0 {
            return Err("idle_poll_ms must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

const fn saturating_ms(d: Duration) -> u64 {
    let ms = d.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}
