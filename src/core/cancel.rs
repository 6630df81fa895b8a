//! Cooperative cancellation shared between the supervisor and running code.
//!
//! Threads cannot be killed safely, so aborting a worker cancels its token
//! and abandons the thread. Task bodies that poll [`CancellationToken::is_cancelled`]
//! or sleep through [`CancellationToken::wait_timeout`] return promptly;
//! bodies that ignore the token keep running detached until they finish.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Clonable cancellation flag with blocking wait support.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    /// Fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let (flag, condvar) = self.inner.as_ref();
        *flag.lock() = true;
        condvar.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = self.inner.as_ref();
        let mut cancelled = flag.lock();
        if !*cancelled {
            // Spurious wakeups just end the wait early; callers loop anyway.
            condvar.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}
