//! The task supervisor: task table, ready queue and SLA monitor.
//!
//! Lock order is always task lock, then workers lock. Task bodies run with no
//! lock held. Every slot of a task is in exactly one place at a time: queued
//! in the ready queue or claimed by a worker in the roster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::error::SupervisorError;
use super::event_log::{EventLog, TracingEventLog};
use super::executor::{ExecutionContext, TaskBody};
use super::metrics::{Metric, MetricsSink, NoopMetrics};
use super::queue::ReadyQueue;
use super::schedule::resolve;
use super::task::{BurstState, TaskHandle, TaskId};
use super::worker_pool::{self, micros, Claim, ClaimedTask, Pull, WorkerRoster, WorkerSlot};
use crate::config::{SupervisorConfig, TaskConfig};
use crate::util::clock::{add_duration, elapsed_between, Clock, SystemClock};

/// Slot accounting of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotCounts {
    /// Slots waiting in the ready queue.
    pub queued: usize,
    /// Slots claimed by a worker.
    pub running: usize,
    /// Spawn count of the schedule in force now.
    pub desired: usize,
}

struct TaskEntry {
    name: Arc<str>,
    culture: Option<Arc<str>>,
    config: TaskConfig,
    body: Arc<dyn TaskBody>,
    state: BurstState,
}

#[derive(Default)]
struct TaskTable {
    entries: BTreeMap<TaskId, TaskEntry>,
    queue: ReadyQueue,
}

impl TaskTable {
    /// Enqueue slots of `task` until queued plus running reaches `desired`.
    ///
    /// With `reuse_first`, the first slot replaces one that just finished and
    /// only the rest count as new `Tasks`. Slots beyond `desired` are never
    /// withdrawn and their `Tasks` count is never given back.
    fn top_up(
        &mut self,
        roster: &WorkerRoster,
        task: TaskId,
        desired: usize,
        reuse_first: bool,
        metrics: &dyn MetricsSink,
    ) -> usize {
        let have = self.queue.queued_for(task) + roster.running_count(task);
        let missing = desired.saturating_sub(have);
        for n in 0..missing {
            self.queue.push_back(task);
            metrics.increment(Metric::ScheduledTasks);
            if n > 0 || !reuse_first {
                metrics.increment(Metric::Tasks);
            }
        }
        missing
    }
}

struct SlaMonitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// State shared between the host handle, the workers and the SLA thread.
pub(crate) struct Shared {
    pub(crate) config: SupervisorConfig,
    pub(crate) event_log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    metrics: RwLock<Arc<dyn MetricsSink>>,
    /// Bumped under the metrics write lock whenever the sink is installed or released.
    generation: AtomicU64,
    initialized: AtomicBool,
    next_task_id: AtomicU64,
    tasks: Mutex<TaskTable>,
    workers: Mutex<WorkerRoster>,
    sla: Mutex<Option<SlaMonitor>>,
}

impl Shared {
    pub(crate) fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics.read())
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Apply `f` to the sink installed in `generation`. Skipped once that sink
    /// was released by `shutdown` or replaced by a later `initialize`.
    pub(crate) fn with_metrics_of(&self, generation: u64, f: impl FnOnce(&dyn MetricsSink)) -> bool {
        let sink = self.metrics.read();
        if self.generation() != generation {
            return false;
        }
        f(sink.as_ref());
        true
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<(), SupervisorError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SupervisorError::NotInitialized)
        }
    }

    /// Claim the first ready slot, rotating unready ones to the back.
    pub(crate) fn pull_ready(&self, slot: &WorkerSlot) -> Pull {
        let mut guard = self.tasks.lock();
        let table = &mut *guard;

        if slot.is_stopped() {
            return Pull::Retired;
        }
        if table.queue.is_empty() {
            return Pull::Idle;
        }
        {
            let mut roster = self.workers.lock();
            if roster.idle_count() > table.queue.len() {
                worker_pool::retire(self, &mut roster, slot.id());
                return Pull::Retired;
            }
        }

        let now = self.clock.now();
        let metrics = self.metrics();
        for _ in 0..table.queue.len() {
            let Some(task_id) = table.queue.pop_front() else {
                break;
            };
            let Some(entry) = table.entries.get_mut(&task_id) else {
                metrics.decrement(Metric::ScheduledTasks);
                continue;
            };
            if !entry.state.is_ready(&now) {
                table.queue.push_back(task_id);
                continue;
            }

            let lag = elapsed_between(now, entry.state.next_attempt);
            metrics.increment_by(Metric::AverageLagTime, micros(lag));
            metrics.increment(Metric::BaseAverageLagTime);
            metrics.decrement(Metric::ScheduledTasks);
            entry.state.begin_run(now);

            let token = CancellationToken::new();
            slot.set_current(Claim {
                task_id,
                started_at: now,
                token: token.clone(),
            });
            debug!(worker_id = slot.id(), task_id, lag_us = micros(lag), "Slot claimed");
            return Pull::Claimed(ClaimedTask {
                task_id,
                body: Arc::clone(&entry.body),
                ctx: ExecutionContext::new(
                    task_id,
                    Arc::clone(&entry.name),
                    entry.culture.clone(),
                    now,
                    token,
                ),
            });
        }
        Pull::Idle
    }

    /// Report a finished execution and re-queue the task's slots.
    pub(crate) fn complete(&self, slot: &WorkerSlot, task_id: TaskId, has_more: bool) {
        let mut guard = self.tasks.lock();
        slot.clear_current();
        if slot.is_abandoned() {
            return;
        }
        let roster = self.workers.lock();
        self.reschedule(&mut guard, &roster, task_id, has_more, self.clock.now());
    }

    /// Drop the slot of an execution whose environment was unavailable.
    pub(crate) fn release_unavailable(&self, slot: &WorkerSlot, task_id: TaskId) {
        let _guard = self.tasks.lock();
        slot.clear_current();
        if !slot.is_abandoned() {
            self.metrics().decrement(Metric::Tasks);
            debug!(task_id, "Slot dropped until next SLA reconciliation");
        }
    }

    /// Retire an idle worker unless it is the last one. Returns whether it was retired.
    pub(crate) fn notify_idle(&self, slot: &WorkerSlot) -> bool {
        let mut roster = self.workers.lock();
        roster.len() > 1 && worker_pool::retire(self, &mut roster, slot.id())
    }

    pub(crate) fn notify_exception(&self, err: &anyhow::Error) {
        self.event_log
            .log_error("Exception caught while executing task.", err);
        let metrics = self.metrics();
        metrics.increment(Metric::TotalExceptions);
        metrics.increment(Metric::ExceptionsPerSecond);
    }

    fn reschedule(
        &self,
        table: &mut TaskTable,
        roster: &WorkerRoster,
        task_id: TaskId,
        has_more: bool,
        now: DateTime<Local>,
    ) {
        let Some(entry) = table.entries.get_mut(&task_id) else {
            return;
        };
        let current = resolve(&entry.config, &now);
        let next_attempt = entry.state.complete(has_more, &current, now);
        let desired = resolve(&entry.config, &next_attempt).spawn as usize;
        let metrics = self.metrics();
        let added = table.top_up(roster, task_id, desired, true, metrics.as_ref());
        debug!(task_id, has_more, %next_attempt, added, "Task rescheduled");
    }

    fn insert_task(&self, body: Arc<dyn TaskBody>, config: TaskConfig) -> TaskHandle {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let next_attempt = add_duration(self.clock.now(), config.delay_start());
        let spawn = resolve(&config, &next_attempt).spawn;
        let name: Arc<str> = Arc::from(config.type_name.as_str());

        let mut guard = self.tasks.lock();
        let table = &mut *guard;
        let metrics = self.metrics();
        for _ in 0..spawn {
            table.queue.push_back(task_id);
            metrics.increment(Metric::ScheduledTasks);
            metrics.increment(Metric::Tasks);
        }
        table.entries.insert(
            task_id,
            TaskEntry {
                name: Arc::clone(&name),
                culture: config.culture.as_deref().map(Arc::from),
                config,
                body,
                state: BurstState::new(next_attempt),
            },
        );
        drop(guard);

        info!(task_id, task = %name, spawn, %next_attempt, "Task registered");
        TaskHandle::new(task_id, name.to_string())
    }

    /// Start the SLA thread if needed and make sure a worker is free to pick up work.
    fn ensure_execution(self: &Arc<Self>) -> Result<(), SupervisorError> {
        self.ensure_sla_monitor()?;
        let mut roster = self.workers.lock();
        if roster.idle_count() == 0 {
            worker_pool::spawn(self, &mut roster);
        }
        Ok(())
    }

    fn ensure_sla_monitor(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let mut sla = self.sla.lock();
        if sla.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = bounded::<()>(0);
        let tick = self.config.sla_tick();
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("task-sla".into())
            .spawn(move || {
                debug!("SLA monitor started");
                loop {
                    shared.sla_tick();
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("SLA monitor stopped");
            })?;
        *sla = Some(SlaMonitor { stop, handle });
        Ok(())
    }

    /// One pass of the SLA monitor.
    fn sla_tick(self: &Arc<Self>) {
        if !self.is_initialized() {
            return;
        }
        let now = self.clock.now();
        let metrics = self.metrics();
        let mut late = false;
        let mut aborted = 0_u32;

        {
            let mut guard = self.tasks.lock();
            let table = &mut *guard;
            let mut roster = self.workers.lock();

            // Queued slots past their SLA.
            for task_id in table.queue.iter() {
                if let Some(entry) = table.entries.get(&task_id) {
                    let next_attempt = entry.state.next_attempt;
                    let sla = resolve(&entry.config, &next_attempt).sla;
                    if add_duration(next_attempt, sla) < now {
                        late = true;
                        break;
                    }
                }
            }

            // Converge every task to the spawn count in force now.
            let ids: Vec<TaskId> = table.entries.keys().copied().collect();
            for task_id in ids {
                let Some(entry) = table.entries.get(&task_id) else {
                    continue;
                };
                let desired = resolve(&entry.config, &now).spawn as usize;
                let added = table.top_up(&roster, task_id, desired, false, metrics.as_ref());
                if added > 0 {
                    debug!(task_id, added, desired, "Slots restored");
                }
            }

            // Abort executions past their timeout while another worker remains.
            let claims: Vec<(u64, Claim)> = roster
                .iter()
                .filter(|w| w.is_running())
                .filter_map(|w| w.current().map(|c| (w.id(), c)))
                .collect();
            for (worker_id, claim) in claims {
                if roster.len() <= 1 {
                    break;
                }
                let Some(entry) = table.entries.get(&claim.task_id) else {
                    continue;
                };
                let timeout = resolve(&entry.config, &claim.started_at).timeout;
                if add_duration(claim.started_at, timeout) >= now {
                    continue;
                }

                if !worker_pool::abort(self, &mut roster, worker_id) {
                    continue;
                }
                worker_pool::spawn(self, &mut roster);
                metrics.increment(Metric::TotalTimeouts);
                metrics.increment(Metric::TimeoutsPerSecond);
                warn!(
                    worker_id,
                    task_id = claim.task_id,
                    timeout = ?timeout,
                    "Execution exceeded timeout - worker aborted"
                );
                self.reschedule(table, &roster, claim.task_id, false, now);
                aborted += 1;
            }
        }

        if late && aborted == 0 {
            let mut roster = self.workers.lock();
            if worker_pool::spawn(self, &mut roster) {
                debug!(workers = roster.len(), "Queued work is late - worker added");
            }
        }
    }

    /// Stop the SLA thread and every worker without waiting for them.
    fn signal_stop(&self) -> (Option<SlaMonitor>, Vec<Arc<WorkerSlot>>) {
        self.initialized.store(false, Ordering::Release);
        let monitor = self.sla.lock().take();

        let mut guard = self.tasks.lock();
        let mut roster = self.workers.lock();
        let slots = roster.drain();
        guard.entries.clear();
        guard.queue.clear();
        (monitor, slots)
    }
}

/// Supervisor of recurring tasks.
///
/// Each registered task owns `spawn` execution slots that workers claim when
/// the task's next attempt is due. Bursts, waits and timeouts follow the
/// task's schedule window in force at the relevant instant.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use prometheus_task_supervisor::config::{SupervisorConfig, TaskConfig};
/// use prometheus_task_supervisor::core::{ExecutionContext, InMemoryMetrics, Supervisor};
///
/// let supervisor = Supervisor::new(SupervisorConfig::default());
/// supervisor.initialize(Arc::new(InMemoryMetrics::new()))?;
/// let handle = supervisor.register_task(
///     Arc::new(|_: &ExecutionContext| -> anyhow::Result<bool> { Ok(false) }),
///     TaskConfig::new("heartbeat"),
/// )?;
/// supervisor.remove_task(&handle)?;
/// supervisor.shutdown()?;
/// ```
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create an uninitialized supervisor.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                event_log: Arc::new(TracingEventLog),
                clock: Arc::new(SystemClock),
                metrics: RwLock::new(Arc::new(NoopMetrics)),
                generation: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                next_task_id: AtomicU64::new(1),
                tasks: Mutex::new(TaskTable::default()),
                workers: Mutex::new(WorkerRoster::default()),
                sla: Mutex::new(None),
            }),
        }
    }

    /// Replace the event log. Call before `initialize`.
    #[must_use]
    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.event_log = event_log;
        }
        self
    }

    /// Replace the clock. Call before `initialize`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.clock = clock;
        }
        self
    }

    /// Settings this supervisor runs with.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Install the metrics sink and reset its counters.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` if called twice without `shutdown`,
    /// `InvalidConfig` if the supervisor settings are rejected.
    pub fn initialize(&self, metrics: Arc<dyn MetricsSink>) -> Result<(), SupervisorError> {
        self.shared
            .config
            .validate()
            .map_err(SupervisorError::InvalidConfig)?;
        let mut sink = self.shared.metrics.write();
        if self.shared.is_initialized() {
            return Err(SupervisorError::AlreadyInitialized);
        }
        for metric in Metric::ALL {
            metrics.set(metric, 0);
        }
        let max_workers = i64::try_from(self.shared.config.max_workers).unwrap_or(i64::MAX);
        metrics.set(Metric::MaxThreads, max_workers);
        *sink = metrics;
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.initialized.store(true, Ordering::Release);

        info!(max_workers = self.shared.config.max_workers, "Task supervisor initialized");
        Ok(())
    }

    /// Whether `initialize` has run and `shutdown` has not.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    /// Register a task. Its first attempt is due after the configured start delay.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize`; `ThreadSpawn` if the SLA thread
    /// cannot start (the task stays registered).
    pub fn register_task(
        &self,
        body: Arc<dyn TaskBody>,
        config: TaskConfig,
    ) -> Result<TaskHandle, SupervisorError> {
        self.shared.ensure_initialized()?;
        let handle = self.shared.insert_task(body, config);
        self.shared.ensure_execution()?;
        Ok(handle)
    }

    /// Remove a task, aborting its running executions. Removing an unknown
    /// or already removed task is a no-op.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize`.
    pub fn remove_task(&self, handle: &TaskHandle) -> Result<(), SupervisorError> {
        self.shared.ensure_initialized()?;
        let task_id = handle.id();
        let metrics = self.shared.metrics();

        let mut guard = self.shared.tasks.lock();
        let table = &mut *guard;
        let mut roster = self.shared.workers.lock();

        let running: Vec<u64> = roster
            .iter()
            .filter(|w| w.current_task() == Some(task_id))
            .map(|w| w.id())
            .collect();
        for worker_id in &running {
            if worker_pool::abort(&self.shared, &mut roster, *worker_id) {
                metrics.decrement(Metric::Tasks);
                // Only an aborted worker leaves the pool short; idle workers are untouched.
                if !worker_pool::spawn(&self.shared, &mut roster) {
                    self.shared
                        .event_log
                        .log("Could not replace worker aborted by task removal.");
                }
            }
        }

        let queued = table.queue.remove_task(task_id);
        for _ in 0..queued {
            metrics.decrement(Metric::ScheduledTasks);
            metrics.decrement(Metric::Tasks);
        }
        let known = table.entries.remove(&task_id).is_some();

        if known {
            info!(task = %handle, aborted = running.len(), queued, "Task removed");
        }
        Ok(())
    }

    /// Stop every thread, forget all tasks and release the metrics sink.
    ///
    /// # Errors
    ///
    /// `NotInitialized` if not initialized.
    pub fn shutdown(&self) -> Result<(), SupervisorError> {
        self.shared.ensure_initialized()?;
        let join_timeout = self.shared.config.join_timeout();
        let (monitor, slots) = self.shared.signal_stop();

        if let Some(SlaMonitor { stop, handle }) = monitor {
            drop(stop);
            worker_pool::join_with_timeout(handle, join_timeout, "task-sla");
        }
        for slot in &slots {
            if let Some(handle) = slot.take_handle() {
                worker_pool::join_with_timeout(handle, join_timeout, &format!("task-worker-{}", slot.id()));
            }
        }

        let sink = {
            let mut current = self.shared.metrics.write();
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            std::mem::replace(&mut *current, Arc::new(NoopMetrics))
        };
        for metric in Metric::ALL {
            sink.set(metric, 0);
        }
        sink.close();

        info!(workers = slots.len(), "Task supervisor shut down");
        Ok(())
    }

    /// Slot accounting of a task, or `None` if it is not registered.
    #[must_use]
    pub fn slot_counts(&self, handle: &TaskHandle) -> Option<SlotCounts> {
        let now = self.shared.clock.now();
        let table = self.shared.tasks.lock();
        let roster = self.shared.workers.lock();
        let entry = table.entries.get(&handle.id())?;
        Some(SlotCounts {
            queued: table.queue.queued_for(handle.id()),
            running: roster.running_count(handle.id()),
            desired: resolve(&entry.config, &now).spawn as usize,
        })
    }

    /// Burst state of a task, or `None` if it is not registered.
    #[must_use]
    pub fn task_state(&self, handle: &TaskHandle) -> Option<BurstState> {
        self.shared
            .tasks
            .lock()
            .entries
            .get(&handle.id())
            .map(|e| e.state)
    }

    /// Worker threads currently in the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().len()
    }

    /// Registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().entries.len()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("initialized", &self.is_initialized())
            .field("tasks", &self.task_count())
            .field("workers", &self.worker_count())
            .finish()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Signal only; threads are detached rather than joined here.
        if self.shared.is_initialized() {
            let _ = self.shared.signal_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScheduleOverrides, ScheduleWindow};
    use crate::core::metrics::InMemoryMetrics;
    use crate::core::AppResult;
    use crate::util::clock::ManualClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 12, h, m, 0).unwrap()
    }

    fn hms(h: u64, m: u64) -> Duration {
        Duration::from_secs(h * 3600 + m * 60)
    }

    fn noop() -> Arc<dyn TaskBody> {
        Arc::new(|_: &ExecutionContext| -> AppResult<bool> { Ok(false) })
    }

    fn supervisor(clock: Arc<ManualClock>) -> (Supervisor, Arc<InMemoryMetrics>) {
        let supervisor = Supervisor::new(SupervisorConfig::default()).with_clock(clock);
        let metrics = Arc::new(InMemoryMetrics::new());
        supervisor.initialize(metrics.clone()).unwrap();
        (supervisor, metrics)
    }

    fn claim(shared: &Shared, slot: &WorkerSlot) -> TaskId {
        match shared.pull_ready(slot) {
            Pull::Claimed(claimed) => claimed.task_id,
            Pull::Idle => panic!("expected a claim, queue idle"),
            Pull::Retired => panic!("expected a claim, worker retired"),
        }
    }

    #[test]
    fn test_initialize_resets_counters() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock);
        assert_eq!(metrics.value(Metric::MaxThreads), 200);
        assert_eq!(metrics.value(Metric::SpawnedThreads), 0);
        assert!(matches!(
            supervisor.initialize(Arc::new(NoopMetrics)),
            Err(SupervisorError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_insert_enqueues_spawn_slots() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock);
        let config = TaskConfig::new("report")
            .with_defaults(ScheduleOverrides::default().with_spawn(3))
            .with_delay_start(Duration::ZERO);
        let handle = supervisor.shared.insert_task(noop(), config);

        let counts = supervisor.slot_counts(&handle).unwrap();
        assert_eq!(counts, SlotCounts { queued: 3, running: 0, desired: 3 });
        assert_eq!(metrics.value(Metric::ScheduledTasks), 3);
        assert_eq!(metrics.value(Metric::Tasks), 3);
    }

    #[test]
    fn test_pull_skips_unready_and_rotates() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, _metrics) = supervisor(clock);
        let later = supervisor.shared.insert_task(noop(), TaskConfig::new("later"));
        let now = supervisor
            .shared
            .insert_task(noop(), TaskConfig::new("now").with_delay_start(Duration::ZERO));

        let slot = WorkerSlot::new(7);
        assert_eq!(claim(&supervisor.shared, &slot), now.id());
        assert_eq!(slot.current_task(), Some(now.id()));
        assert!(matches!(supervisor.shared.pull_ready(&WorkerSlot::new(8)), Pull::Idle));
        assert_eq!(supervisor.slot_counts(&later).unwrap().queued, 1);
    }

    #[test]
    fn test_complete_requeues_after_wait() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock.clone());
        let config = TaskConfig::new("poll")
            .with_defaults(ScheduleOverrides::default().with_wait(Duration::from_secs(30)))
            .with_delay_start(Duration::ZERO);
        let handle = supervisor.shared.insert_task(noop(), config);

        let slot = WorkerSlot::new(1);
        claim(&supervisor.shared, &slot);
        assert_eq!(metrics.value(Metric::ScheduledTasks), 0);
        supervisor.shared.complete(&slot, handle.id(), false);

        let state = supervisor.task_state(&handle).unwrap();
        assert_eq!(state.next_attempt, at(8, 0) + chrono::TimeDelta::seconds(30));
        assert_eq!(supervisor.slot_counts(&handle).unwrap().queued, 1);
        assert_eq!(metrics.value(Metric::ScheduledTasks), 1);
        assert_eq!(metrics.value(Metric::Tasks), 1);
        assert_eq!(metrics.value(Metric::BaseAverageLagTime), 1);
    }

    #[test]
    fn test_tasks_counter_not_returned_when_spawn_shrinks() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock.clone());
        let config = TaskConfig::new("office")
            .with_delay_start(Duration::ZERO)
            .with_window(
                ScheduleWindow::new(hms(9, 0), hms(17, 0))
                    .with_overrides(ScheduleOverrides::default().with_spawn(3)),
            );
        let handle = supervisor.shared.insert_task(noop(), config);
        let shared = &supervisor.shared;
        let slot = WorkerSlot::new(1);

        claim(shared, &slot);
        clock.set(at(10, 0));
        shared.complete(&slot, handle.id(), false);
        assert_eq!(supervisor.slot_counts(&handle).unwrap().queued, 3);
        assert_eq!(metrics.value(Metric::Tasks), 3);

        // Leaving the window: surplus slots drain but Tasks keeps counting them.
        clock.set(at(18, 0));
        claim(shared, &slot);
        shared.complete(&slot, handle.id(), false);
        claim(shared, &slot);
        shared.complete(&slot, handle.id(), false);
        let counts = supervisor.slot_counts(&handle).unwrap();
        assert_eq!(counts.queued + counts.running, 1);
        assert_eq!(counts.desired, 1);
        assert_eq!(metrics.value(Metric::Tasks), 3);
    }

    #[test]
    fn test_unavailable_slot_is_restored_by_sla() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock);
        let handle = supervisor
            .shared
            .insert_task(noop(), TaskConfig::new("remote").with_delay_start(Duration::ZERO));

        let slot = WorkerSlot::new(1);
        claim(&supervisor.shared, &slot);
        supervisor.shared.release_unavailable(&slot, handle.id());
        assert_eq!(supervisor.slot_counts(&handle).unwrap().queued, 0);
        assert_eq!(metrics.value(Metric::Tasks), 0);

        supervisor.shared.sla_tick();
        assert_eq!(supervisor.slot_counts(&handle).unwrap().queued, 1);
        assert_eq!(metrics.value(Metric::Tasks), 1);
    }

    #[test]
    fn test_remove_strips_queue_and_is_idempotent() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock);
        let config = TaskConfig::new("gone").with_defaults(ScheduleOverrides::default().with_spawn(2));
        let handle = supervisor.shared.insert_task(noop(), config);

        supervisor.remove_task(&handle).unwrap();
        supervisor.remove_task(&handle).unwrap();
        assert!(supervisor.slot_counts(&handle).is_none());
        assert_eq!(supervisor.task_count(), 0);
        assert_eq!(metrics.value(Metric::ScheduledTasks), 0);
        assert_eq!(metrics.value(Metric::Tasks), 0);
    }

    #[test]
    fn test_released_sink_ignores_earlier_generation() {
        let clock = Arc::new(ManualClock::new(at(8, 0)));
        let (supervisor, metrics) = supervisor(clock);
        let before = supervisor.shared.generation();
        assert!(supervisor
            .shared
            .with_metrics_of(before, |m| m.increment(Metric::TasksRunning)));

        supervisor.shutdown().unwrap();
        supervisor.initialize(metrics.clone()).unwrap();
        assert!(!supervisor
            .shared
            .with_metrics_of(before, |m| m.decrement(Metric::TasksRunning)));
        assert_eq!(metrics.value(Metric::TasksRunning), 0);
        assert!(supervisor
            .shared
            .with_metrics_of(supervisor.shared.generation(), |m| m.increment(Metric::Tasks)));
        assert_eq!(metrics.value(Metric::Tasks), 1);
    }

    #[test]
    fn test_initialize_rejects_invalid_settings() {
        let supervisor = Supervisor::new(SupervisorConfig::default().with_max_workers(0));
        assert!(matches!(
            supervisor.initialize(Arc::new(NoopMetrics)),
            Err(SupervisorError::InvalidConfig(_))
        ));
        assert!(!supervisor.is_initialized());
    }

    #[test]
    fn test_operations_require_initialize() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        let handle = TaskHandle::new(1, "x".into());
        assert!(matches!(
            supervisor.register_task(noop(), TaskConfig::new("x")),
            Err(SupervisorError::NotInitialized)
        ));
        assert!(matches!(supervisor.remove_task(&handle), Err(SupervisorError::NotInitialized)));
        assert!(matches!(supervisor.shutdown(), Err(SupervisorError::NotInitialized)));
    }
}
