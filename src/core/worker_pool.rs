//! Worker threads and the roster that tracks them.
//!
//! Each worker is a dedicated OS thread that polls the supervisor for a ready
//! slot, runs the task body with no supervisor lock held, and reports the
//! outcome back. The roster lives behind the supervisor's workers lock and
//! is always acquired after the task lock.
//!
//! Aborting a worker cancels the token of its current execution, marks the
//! worker abandoned and drops it from the roster. The thread itself is
//! detached: it exits as soon as the body returns and never reports a
//! completion for the aborted run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::error::TaskUnavailable;
use super::executor::{ExecutionContext, TaskBody};
use super::metrics::Metric;
use super::supervisor::Shared;
use super::task::TaskId;

/// Identifier of a worker thread, unique per supervisor.
pub type WorkerId = u64;

/// Execution currently owned by a worker.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub task_id: TaskId,
    pub started_at: DateTime<Local>,
    pub token: CancellationToken,
}

/// Shared view of one worker thread.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    id: WorkerId,
    /// Cancelled when the worker must exit its loop.
    stop: CancellationToken,
    /// Set while the worker owns a claimed execution. Read outside the locks.
    running: AtomicBool,
    /// Set when the worker was aborted; its in-flight run is disowned.
    abandoned: AtomicBool,
    current: Mutex<Option<Claim>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            current: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub(crate) const fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Claimed execution, if any. Callers hold the task lock.
    pub(crate) fn current(&self) -> Option<Claim> {
        self.current.lock().clone()
    }

    pub(crate) fn current_task(&self) -> Option<TaskId> {
        self.current.lock().as_ref().map(|c| c.task_id)
    }

    /// Record a claim. Callers hold the task lock.
    pub(crate) fn set_current(&self, claim: Claim) {
        *self.current.lock() = Some(claim);
        self.running.store(true, Ordering::Release);
    }

    /// Release the claim. Callers hold the task lock.
    pub(crate) fn clear_current(&self) {
        *self.current.lock() = None;
        self.running.store(false, Ordering::Release);
    }

    fn request_stop(&self) {
        self.stop.cancel();
    }

    fn abort(&self) {
        self.abandoned.store(true, Ordering::Release);
        if let Some(claim) = self.current.lock().as_ref() {
            claim.token.cancel();
        }
        self.stop.cancel();
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().take()
    }
}

/// Workers known to the supervisor.
#[derive(Debug, Default)]
pub(crate) struct WorkerRoster {
    workers: Vec<Arc<WorkerSlot>>,
    next_id: WorkerId,
}

impl WorkerRoster {
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_running()).count()
    }

    pub(crate) fn running_count(&self, task: TaskId) -> usize {
        self.workers
            .iter()
            .filter(|w| w.current_task() == Some(task))
            .count()
    }

    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<WorkerSlot>> {
        self.workers.iter()
    }

    fn remove(&mut self, id: WorkerId) -> Option<Arc<WorkerSlot>> {
        let index = self.workers.iter().position(|w| w.id == id)?;
        Some(self.workers.remove(index))
    }

    /// Remove every worker, stopping and disowning their runs.
    pub(crate) fn drain(&mut self) -> Vec<Arc<WorkerSlot>> {
        let slots: Vec<_> = self.workers.drain(..).collect();
        for slot in &slots {
            slot.abort();
        }
        slots
    }
}

/// Start a worker thread if the pool is below its cap. Returns whether one was started.
pub(crate) fn spawn(shared: &Arc<Shared>, roster: &mut WorkerRoster) -> bool {
    if !shared.is_initialized() || roster.len() >= shared.config.max_workers {
        return false;
    }

    let id = roster.next_id;
    roster.next_id += 1;
    let slot = Arc::new(WorkerSlot::new(id));

    let mut builder = thread::Builder::new().name(format!("task-worker-{id}"));
    if let Some(size) = shared.config.thread_stack_size {
        builder = builder.stack_size(size);
    }
    let thread_shared = Arc::clone(shared);
    let thread_slot = Arc::clone(&slot);
    match builder.spawn(move || run(&thread_shared, &thread_slot)) {
        Ok(handle) => {
            *slot.handle.lock() = Some(handle);
            roster.workers.push(slot);
            shared.metrics().increment(Metric::SpawnedThreads);
            debug!(worker_id = id, workers = roster.len(), "Worker spawned");
            true
        }
        Err(e) => {
            shared
                .event_log
                .log_error("Failed to spawn worker thread.", &anyhow::Error::new(e));
            false
        }
    }
}

/// Remove a worker and let its thread exit after the current poll.
pub(crate) fn retire(shared: &Shared, roster: &mut WorkerRoster, id: WorkerId) -> bool {
    let Some(slot) = roster.remove(id) else {
        return false;
    };
    slot.request_stop();
    shared.metrics().decrement(Metric::SpawnedThreads);
    debug!(worker_id = id, workers = roster.len(), "Worker retired");
    true
}

/// Remove a worker and disown its in-flight execution.
pub(crate) fn abort(shared: &Shared, roster: &mut WorkerRoster, id: WorkerId) -> bool {
    let Some(slot) = roster.remove(id) else {
        return false;
    };
    slot.abort();
    // The thread is detached; it exits once the body observes the token or returns.
    drop(slot.take_handle());
    shared.metrics().decrement(Metric::SpawnedThreads);
    debug!(worker_id = id, workers = roster.len(), "Worker aborted");
    true
}

/// Join a thread, detaching it if it does not exit within `timeout`.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, label: &str) {
    let (tx, rx) = bounded(1);
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });

    match rx.recv_timeout(timeout) {
        Ok(true) => {
            debug!(thread = label, "Thread joined");
            let _ = joiner.join();
        }
        Ok(false) => {
            warn!(thread = label, "Thread panicked");
            let _ = joiner.join();
        }
        Err(_) => {
            warn!(thread = label, "Thread did not exit within timeout - detaching");
        }
    }
}

/// What a worker obtained from the ready queue.
pub(crate) enum Pull {
    /// A slot was claimed.
    Claimed(ClaimedTask),
    /// Nothing ready.
    Idle,
    /// The worker was retired and must exit.
    Retired,
}

/// A claimed slot with everything needed to run it lock-free.
pub(crate) struct ClaimedTask {
    pub task_id: TaskId,
    pub body: Arc<dyn TaskBody>,
    pub ctx: ExecutionContext,
}

enum Outcome {
    Finished(bool),
    Unavailable,
    Aborted,
}

fn run(shared: &Arc<Shared>, slot: &Arc<WorkerSlot>) {
    debug!(worker_id = slot.id, "Worker thread started");
    let mut last_run = Instant::now();

    while !slot.is_stopped() {
        match shared.pull_ready(slot) {
            Pull::Retired => break,
            Pull::Idle => {
                if last_run.elapsed() >= shared.config.idle_timeout() && shared.notify_idle(slot) {
                    break;
                }
                if slot.stop.wait_timeout(shared.config.idle_poll()) {
                    break;
                }
            }
            Pull::Claimed(claimed) => {
                let outcome = execute(shared, slot, &claimed);
                last_run = Instant::now();
                match outcome {
                    Outcome::Aborted => break,
                    Outcome::Finished(has_more) => shared.complete(slot, claimed.task_id, has_more),
                    Outcome::Unavailable => shared.release_unavailable(slot, claimed.task_id),
                }
                if slot.stop.wait_timeout(shared.config.post_run_pause()) {
                    break;
                }
            }
        }
    }

    debug!(worker_id = slot.id, "Worker thread exiting");
}

fn execute(shared: &Shared, slot: &WorkerSlot, claimed: &ClaimedTask) -> Outcome {
    // Gauges are only touched on the sink this run started under.
    let generation = shared.generation();
    shared.with_metrics_of(generation, |m| m.increment(Metric::TasksRunning));
    debug!(worker_id = slot.id, task_id = claimed.task_id, "Worker executing task");

    let timer = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| claimed.body.execute(&claimed.ctx)));
    let elapsed = timer.elapsed();

    let outcome = if slot.is_abandoned() {
        debug!(worker_id = slot.id, task_id = claimed.task_id, "Aborted execution returned");
        Outcome::Aborted
    } else {
        match result {
            Ok(Ok(has_more)) => {
                shared.with_metrics_of(generation, |m| {
                    m.increment_by(Metric::AverageExecutionTime, micros(elapsed));
                    m.increment(Metric::BaseAverageExecutionTime);
                });
                Outcome::Finished(has_more)
            }
            Ok(Err(err)) if err.is::<TaskUnavailable>() => {
                debug!(task_id = claimed.task_id, error = %err, "Task environment unavailable");
                Outcome::Unavailable
            }
            Ok(Err(err)) => {
                shared.notify_exception(&err);
                Outcome::Finished(false)
            }
            Err(payload) => {
                let err = anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()));
                shared.notify_exception(&err);
                Outcome::Finished(false)
            }
        }
    };

    if !shared.with_metrics_of(generation, |m| m.decrement(Metric::TasksRunning)) {
        debug!(worker_id = slot.id, task_id = claimed.task_id, "Run outlived its metrics sink");
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}

/// Whole microseconds, saturating.
pub(crate) fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_claim_lifecycle() {
        let slot = WorkerSlot::new(1);
        assert!(!slot.is_running());
        assert_eq!(slot.current_task(), None);

        let token = CancellationToken::new();
        slot.set_current(Claim {
            task_id: 9,
            started_at: Local::now(),
            token: token.clone(),
        });
        assert!(slot.is_running());
        assert_eq!(slot.current_task(), Some(9));

        slot.abort();
        assert!(slot.is_abandoned());
        assert!(slot.is_stopped());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_roster_counts() {
        let mut roster = WorkerRoster::default();
        for id in 0..3 {
            roster.workers.push(Arc::new(WorkerSlot::new(id)));
        }
        roster.workers[0].set_current(Claim {
            task_id: 4,
            started_at: Local::now(),
            token: CancellationToken::new(),
        });

        assert_eq!(roster.len(), 3);
        assert_eq!(roster.idle_count(), 2);
        assert_eq!(roster.running_count(4), 1);
        assert_eq!(roster.running_count(5), 0);

        assert!(roster.remove(1).is_some());
        assert!(roster.remove(1).is_none());
        let drained = roster.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|w| w.is_abandoned()));
        assert_eq!(roster.len(), 0);
    }

    #[test]
    fn test_join_with_timeout_detaches_hung_thread() {
        let hung = thread::spawn(|| thread::sleep(Duration::from_millis(500)));
        let start = Instant::now();
        join_with_timeout(hung, Duration::from_millis(20), "hung");
        assert!(start.elapsed() < Duration::from_millis(400));

        let quick = thread::spawn(|| {});
        join_with_timeout(quick, Duration::from_secs(1), "quick");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
