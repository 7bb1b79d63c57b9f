//! Cancellable periodic background job.
//!
//! [`PeriodicTask`] runs a closure on its own named thread once per period
//! until cancelled. Cancellation wakes the thread immediately instead of
//! waiting out the current period.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Shared flag that stops a [`PeriodicTask`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// True once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` or until cancelled. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Handle to a running periodic job.
/// Dropping this handle cancels the job and joins its thread.
pub struct PeriodicTask {
    token: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a thread named `name` running `body` every `period`.
    ///
    /// The first run happens one full period after spawning. Runs never
    /// overlap: a slow run delays the next tick rather than stacking up.
    pub fn spawn<F>(name: &str, period: Duration, mut body: F) -> StoreResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread_name = name.to_string();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(task = %thread_name, period_ms = period.as_millis() as u64, "Periodic task started");
                while !thread_token.wait_timeout(period) {
                    body();
                }
                debug!(task = %thread_name, "Periodic task stopped");
            })
            .map_err(|e| StoreError::Io {
                path: None,
                kind: e.kind(),
                message: format!("Failed to spawn {} thread: {}", name, e),
            })?;

        Ok(Self { token, thread: Some(thread) })
    }

    /// Token cancelling this task.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Check if the background thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Cancel and wait for the background thread to finish.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                // Cancelled from inside the task body; the loop exits on its own
                return;
            }
            if handle.join().is_err() {
                warn!("Periodic task thread panicked");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_task_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = PeriodicTask::spawn("test-ticker", Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(task.is_running());
        thread::sleep(Duration::from_millis(200));
        task.cancel();

        let after_cancel = ticks.load(Ordering::SeqCst);
        assert!(after_cancel >= 2, "expected several ticks, got {}", after_cancel);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel, "ticked after cancel");
    }

    #[test]
    fn test_cancel_interrupts_long_period() {
        let task = PeriodicTask::spawn("test-slow", Duration::from_secs(3600), || {}).unwrap();
        let started = Instant::now();
        task.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_token_wait() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));

        let remote = token.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(token.is_cancelled());
        waker.join().unwrap();
    }
}
