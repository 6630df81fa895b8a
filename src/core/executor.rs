//! Task body abstraction and its execution context.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::cancel::CancellationToken;
use super::error::AppResult;
use super::task::TaskId;

/// Per-execution information handed to a task body.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: TaskId,
    task_name: Arc<str>,
    culture: Option<Arc<str>>,
    started_at: DateTime<Local>,
    token: CancellationToken,
}

impl ExecutionContext {
    /// Build a context. The supervisor creates one per execution.
    #[must_use]
    pub const fn new(
        task_id: TaskId,
        task_name: Arc<str>,
        culture: Option<Arc<str>>,
        started_at: DateTime<Local>,
        token: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            task_name,
            culture,
            started_at,
            token,
        }
    }

    /// Identifier of the running task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Type name of the running task.
    #[must_use]
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Culture tag configured for the task, if any.
    #[must_use]
    pub fn culture(&self) -> Option<&str> {
        self.culture.as_deref()
    }

    /// When this execution started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Token cancelled when the supervisor aborts this execution.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the supervisor has aborted this execution.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `duration`, waking early on abort. Returns `true` if aborted.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.token.wait_timeout(duration)
    }
}

/// A unit of recurring work.
///
/// One body instance serves every concurrent slot of its task, so `execute`
/// may run on several worker threads at once.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_task_supervisor::core::{ExecutionContext, TaskBody};
///
/// struct DrainOutbox;
///
/// impl TaskBody for DrainOutbox {
///     fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<bool> {
///         let sent = send_batch(ctx.culture())?;
///         Ok(sent > 0) // more work is likely waiting
///     }
/// }
/// ```
pub trait TaskBody: Send + Sync + 'static {
    /// Run once. `Ok(true)` means more work is pending and the task should
    /// be re-run within its burst allowance.
    ///
    /// # Errors
    ///
    /// Any error is logged and counted; the run is treated as having no
    /// more work. Return [`TaskUnavailable`](super::TaskUnavailable) when the
    /// body's environment is gone.
    fn execute(&self, ctx: &ExecutionContext) -> AppResult<bool>;
}

impl<F> TaskBody for F
where
    F: Fn(&ExecutionContext) -> AppResult<bool> + Send + Sync + 'static,
{
    fn execute(&self, ctx: &ExecutionContext) -> AppResult<bool> {
        self(ctx)
    }
}

#[cfg(feature = "tokio-runtime")]
pub use async_body::{AsyncBody, AsyncTaskBody};

#[cfg(feature = "tokio-runtime")]
mod async_body {
    use std::cell::RefCell;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::{AppResult, ExecutionContext, TaskBody};

    thread_local! {
        // One current-thread runtime per worker thread, created on first use.
        static WORKER_RUNTIME: RefCell<Option<tokio::runtime::Runtime>> = const { RefCell::new(None) };
    }

    /// Async flavour of [`TaskBody`].
    #[async_trait]
    pub trait AsyncTaskBody: Send + Sync + 'static {
        /// Run once; same contract as [`TaskBody::execute`].
        async fn execute(&self, ctx: &ExecutionContext) -> AppResult<bool>;
    }

    /// Adapter running an [`AsyncTaskBody`] on the worker thread's own
    /// single-threaded tokio runtime, so async bodies never block the
    /// host's runtime.
    #[derive(Debug, Clone)]
    pub struct AsyncBody<T>(pub T);

    impl<T: AsyncTaskBody> TaskBody for AsyncBody<T> {
        fn execute(&self, ctx: &ExecutionContext) -> AppResult<bool> {
            WORKER_RUNTIME.with(|cell| {
                let mut slot = cell.borrow_mut();
                if slot.is_none() {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?;
                    *slot = Some(runtime);
                }
                match slot.as_ref() {
                    Some(runtime) => runtime.block_on(self.0.execute(ctx)),
                    None => Err(anyhow!("worker runtime unavailable")),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Instant;

    fn ctx(token: CancellationToken) -> ExecutionContext {
        ExecutionContext::new(3, Arc::from("sample"), Some(Arc::from("fr-FR")), Local::now(), token)
    }

    #[test]
    fn test_closure_is_a_task_body() {
        let body = |ctx: &ExecutionContext| -> AppResult<bool> { Ok(ctx.task_id() == 3) };
        assert!(body.execute(&ctx(CancellationToken::new())).unwrap());

        let failing = |_: &ExecutionContext| -> AppResult<bool> { bail!("broken") };
        assert!(failing.execute(&ctx(CancellationToken::new())).is_err());
    }

    #[test]
    fn test_context_accessors() {
        let c = ctx(CancellationToken::new());
        assert_eq!(c.task_name(), "sample");
        assert_eq!(c.culture(), Some("fr-FR"));
        assert!(!c.is_cancelled());
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(ctx(token).sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[cfg(feature = "tokio-runtime")]
    #[test]
    fn test_async_body_runs_on_thread_runtime() {
        use async_trait::async_trait;

        struct Tick;

        #[async_trait]
        impl AsyncTaskBody for Tick {
            async fn execute(&self, ctx: &ExecutionContext) -> AppResult<bool> {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(ctx.culture().is_some())
            }
        }

        let body = AsyncBody(Tick);
        let c = ctx(CancellationToken::new());
        assert!(body.execute(&c).unwrap());
        // Second call reuses the thread-local runtime.
        assert!(body.execute(&c).unwrap());
    }
}
