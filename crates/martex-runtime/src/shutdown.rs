//! Graceful shutdown tracking of active report runs.

use std::collections::HashSet;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, ErrorKind, Result, TRACING_TARGET_SHUTDOWN};

#[derive(Default)]
struct Inner {
    shutting_down: AtomicBool,
    active: Mutex<HashSet<String>>,
    idle: Notify,
    token: CancellationToken,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shutdown mode flag plus the set of runs in flight.
///
/// Once [`initiate`](Self::initiate) is called new runs are refused, the
/// shared cancellation token fires and [`wait_for_idle`](Self::wait_for_idle)
/// waits for the active runs to unregister.
#[derive(Clone, Default)]
pub struct GracefulShutdown {
    inner: Arc<Inner>,
}

impl GracefulShutdown {
    /// Creates a tracker with no active runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a unique process id `report-{reportId}-{millis}-{random}`.
    pub fn generate_process_id(report_id: Uuid, now: Timestamp) -> String {
        let random = Uuid::new_v4().simple().to_string();
        format!("report-{report_id}-{}-{}", now.as_millisecond(), &random[..9])
    }

    /// Returns whether shutdown was initiated.
    pub fn is_in_shutdown_mode(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Fails with `ShuttingDown` once shutdown was initiated.
    pub fn ensure_accepting(&self) -> Result<()> {
        if self.is_in_shutdown_mode() {
            return Err(Error::new(ErrorKind::ShuttingDown)
                .with_message("Application is shutting down, cannot start new reports"));
        }
        Ok(())
    }

    /// Returns the token cancelled when shutdown is initiated.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Registers an active run until the returned guard is dropped.
    #[must_use = "the process is unregistered when the guard is dropped"]
    pub fn register(&self, process_id: impl Into<String>) -> ProcessGuard {
        let process_id = process_id.into();
        self.inner.active().insert(process_id.clone());

        tracing::debug!(
            target: TRACING_TARGET_SHUTDOWN,
            process_id = %process_id,
            "Active process registered"
        );

        ProcessGuard {
            inner: Arc::clone(&self.inner),
            process_id,
        }
    }

    /// Returns the ids of the active runs.
    pub fn active_processes(&self) -> Vec<String> {
        let mut processes: Vec<String> = self.inner.active().iter().cloned().collect();
        processes.sort();
        processes
    }

    /// Returns the number of active runs.
    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }

    /// Refuses new runs and cancels the runs in flight.
    pub fn initiate(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            active = self.active_count(),
            "Graceful shutdown initiated"
        );
        self.inner.token.cancel();
    }

    /// Waits until no run is active or `timeout` elapses.
    ///
    /// Returns whether every run drained in time.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();

            if self.active_count() == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.active_processes();
                if remaining.is_empty() {
                    return true;
                }

                tracing::warn!(
                    target: TRACING_TARGET_SHUTDOWN,
                    remaining = ?remaining,
                    "Shutdown timeout reached with active processes"
                );
                return false;
            }
        }
    }
}

impl fmt::Debug for GracefulShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulShutdown")
            .field("shutting_down", &self.is_in_shutdown_mode())
            .field("active", &self.active_count())
            .finish()
    }
}

/// Registration of one active run.
pub struct ProcessGuard {
    inner: Arc<Inner>,
    process_id: String,
}

impl ProcessGuard {
    /// Returns the registered process id.
    pub fn process_id(&self) -> &str {
        &self.process_id
    }
}

impl fmt::Debug for ProcessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessGuard").field(&self.process_id).finish()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let idle = {
            let mut active = self.inner.active();
            active.remove(&self.process_id);
            active.is_empty()
        };

        tracing::debug!(
            target: TRACING_TARGET_SHUTDOWN,
            process_id = %self.process_id,
            "Active process unregistered"
        );

        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_format() {
        let report_id = Uuid::now_v7();
        let now = Timestamp::from_millisecond(1_700_000_000_000).unwrap();

        let process_id = GracefulShutdown::generate_process_id(report_id, now);
        let prefix = format!("report-{report_id}-1700000000000-");
        assert!(process_id.starts_with(&prefix));
        assert_eq!(process_id.len(), prefix.len() + 9);
        assert_ne!(process_id, GracefulShutdown::generate_process_id(report_id, now));
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let shutdown = GracefulShutdown::new();
        let first = shutdown.register("report-a");
        let second = shutdown.register("report-b");
        assert_eq!(shutdown.active_processes(), ["report-a", "report-b"]);

        drop(first);
        assert_eq!(shutdown.active_processes(), ["report-b"]);
        assert_eq!(second.process_id(), "report-b");
        drop(second);
        assert_eq!(shutdown.active_count(), 0);
    }

    #[test]
    fn test_initiate_refuses_new_runs_and_cancels() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.cancellation_token();
        assert!(shutdown.ensure_accepting().is_ok());

        shutdown.initiate();
        shutdown.initiate();

        assert!(shutdown.is_in_shutdown_mode());
        assert!(token.is_cancelled());
        let error = shutdown.ensure_accepting().unwrap_err();
        assert_eq!(error.kind, ErrorKind::ShuttingDown);
    }

    #[tokio::test]
    async fn test_wait_for_idle_drains() {
        let shutdown = GracefulShutdown::new();
        let guard = shutdown.register("report-a");

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait_for_idle(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle_times_out() {
        let shutdown = GracefulShutdown::new();
        let _guard = shutdown.register("report-a");

        assert!(!shutdown.wait_for_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_idle_without_processes() {
        assert!(GracefulShutdown::new().wait_for_idle(Duration::from_millis(10)).await);
    }
}
