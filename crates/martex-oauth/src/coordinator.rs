//! Per-credential single-flight refresh coordination.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use uuid::Uuid;

use crate::{Error, ErrorKind, Result, TRACING_TARGET_COORDINATOR};

type SharedOutcome = std::result::Result<(), Arc<Error>>;
type SharedRefresh = Shared<BoxFuture<'static, SharedOutcome>>;
type InFlightMap = HashMap<Uuid, InFlight>;

struct InFlight {
    generation: u64,
    refresh: SharedRefresh,
}

/// Ensures at most one refresh per credential is in flight in this process.
///
/// The refresh itself runs on a spawned task, so it completes and releases
/// its entry even when every caller awaiting it is dropped. Entries are
/// removed when that task ends, whether it succeeds, fails or panics.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Default)]
struct CoordinatorInner {
    inflight: Mutex<InFlightMap>,
    generation: AtomicU64,
}

impl CoordinatorInner {
    fn lock(&self) -> MutexGuard<'_, InFlightMap> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the entry it was created for when dropped.
struct ReleaseOnDrop {
    inner: Arc<CoordinatorInner>,
    credential_id: Uuid,
    generation: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let mut inflight = self.inner.lock();
        if inflight
            .get(&self.credential_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            inflight.remove(&self.credential_id);
            tracing::trace!(
                target: TRACING_TARGET_COORDINATOR,
                credential_id = %self.credential_id,
                "Refresh lock released"
            );
        }
    }
}

impl RefreshCoordinator {
    /// Creates a coordinator with no refresh in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `refresh` unless a refresh for `credential_id` is already in flight,
    /// in which case the caller waits for that one instead.
    ///
    /// Every joined caller observes the outcome of the same operation.
    pub async fn refresh_with_lock<F, Fut>(&self, credential_id: Uuid, refresh: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inner.lock();
            match inflight.get(&credential_id) {
                Some(entry) => {
                    tracing::debug!(
                        target: TRACING_TARGET_COORDINATOR,
                        credential_id = %credential_id,
                        "Joining in-flight token refresh"
                    );
                    entry.refresh.clone()
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let release = ReleaseOnDrop {
                        inner: Arc::clone(&self.inner),
                        credential_id,
                        generation,
                    };

                    let operation = refresh();
                    let task = tokio::spawn(async move {
                        let _release = release;
                        operation.await
                    });

                    let refresh = async move {
                        match task.await {
                            Ok(outcome) => outcome.map_err(Arc::new),
                            Err(join_error) => Err(Arc::new(
                                Error::from_source(ErrorKind::Internal, join_error)
                                    .with_message("Token refresh task did not complete"),
                            )),
                        }
                    }
                    .boxed()
                    .shared();

                    tracing::debug!(
                        target: TRACING_TARGET_COORDINATOR,
                        credential_id = %credential_id,
                        generation,
                        "Starting token refresh"
                    );

                    inflight.insert(
                        credential_id,
                        InFlight {
                            generation,
                            refresh: refresh.clone(),
                        },
                    );
                    refresh
                }
            }
        };

        shared.await.map_err(|shared_error| {
            Error::new(shared_error.kind)
                .with_message(shared_error.message_or_kind())
                .with_source(shared_error)
        })
    }

    /// Returns the number of refreshes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether a refresh for `credential_id` is in flight.
    pub fn is_refreshing(&self, credential_id: Uuid) -> bool {
        self.inner.lock().contains_key(&credential_id)
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let credential_id = Uuid::now_v7();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .refresh_with_lock(credential_id, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(())
                    })
                    .await
            }));
        }

        while !coordinator.is_refreshing(credential_id) {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_lock_released() {
        let coordinator = RefreshCoordinator::new();
        let credential_id = Uuid::now_v7();

        let error = coordinator
            .refresh_with_lock(credential_id, || async {
                Err(Error::new(ErrorKind::TokenRefreshFailed).with_message("invalid_grant"))
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::TokenRefreshFailed);
        assert_eq!(error.message.as_deref(), Some("invalid_grant"));
        assert!(!coordinator.is_refreshing(credential_id));
    }

    #[tokio::test]
    async fn test_sequential_callers_start_fresh_operations() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let credential_id = Uuid::now_v7();

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            coordinator
                .refresh_with_lock(credential_id, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panic_releases_lock() {
        let coordinator = RefreshCoordinator::new();
        let credential_id = Uuid::now_v7();

        let error = coordinator
            .refresh_with_lock(credential_id, || async { panic!("refresh panicked") })
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Internal);
        assert!(!coordinator.is_refreshing(credential_id));
    }

    #[tokio::test]
    async fn test_refresh_completes_when_caller_is_dropped() {
        let coordinator = RefreshCoordinator::new();
        let credential_id = Uuid::now_v7();
        let done = Arc::new(Notify::new());

        let caller = {
            let coordinator = coordinator.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                coordinator
                    .refresh_with_lock(credential_id, move || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        done.notify_one();
                        Ok(())
                    })
                    .await
            })
        };

        while !coordinator.is_refreshing(credential_id) {
            tokio::task::yield_now().await;
        }
        caller.abort();

        done.notified().await;
        while coordinator.is_refreshing(credential_id) {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_credentials_do_not_join() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let calls = Arc::clone(&calls);
            coordinator.refresh_with_lock(Uuid::now_v7(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let second = {
            let calls = Arc::clone(&calls);
            coordinator.refresh_with_lock(Uuid::now_v7(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
