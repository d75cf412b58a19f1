//! Connection lifecycle shared by every store backend.
//!
//! Concurrent callers that find the store disconnected share a single
//! connection attempt. A failed attempt is forgotten so the next caller
//! starts a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{CalMirrorError, CalMirrorResult};

type Attempt = Shared<BoxFuture<'static, Result<(), String>>>;

pub struct ConnectionManager {
    auto_connect: bool,
    connected: AtomicBool,
    in_flight: Mutex<Option<Attempt>>,
}

impl ConnectionManager {
    pub fn new(auto_connect: bool) -> Self {
        ConnectionManager {
            auto_connect,
            connected: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Connect, joining an attempt already in flight if there is one.
    ///
    /// `attempt` is only invoked when this caller starts a new attempt.
    pub async fn connect<F>(&self, attempt: F) -> CalMirrorResult<()>
    where
        F: FnOnce() -> BoxFuture<'static, CalMirrorResult<()>>,
    {
        if self.is_connected() {
            return Ok(());
        }

        let shared = {
            let mut slot = self.slot();
            // A concurrent attempt may have finished since the check above.
            if self.is_connected() {
                return Ok(());
            }
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fut = attempt()
                        .map(|result| result.map_err(connection_message))
                        .boxed()
                        .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = shared.clone().await;

        {
            let mut slot = self.slot();
            if result.is_ok() {
                self.connected.store(true, Ordering::Release);
            }
            if slot.as_ref().is_some_and(|s| Shared::ptr_eq(s, &shared)) {
                *slot = None;
            }
        }

        result.map_err(CalMirrorError::Connection)
    }

    /// Connect on demand, or fail if auto-connect is disabled.
    pub async fn ensure_connected<F>(&self, attempt: F) -> CalMirrorResult<()>
    where
        F: FnOnce() -> BoxFuture<'static, CalMirrorResult<()>>,
    {
        if self.is_connected() {
            return Ok(());
        }
        if !self.auto_connect {
            return Err(CalMirrorError::Connection(
                "Store is not connected and auto-connect is disabled".into(),
            ));
        }
        self.connect(attempt).await
    }

    fn slot(&self) -> MutexGuard<'_, Option<Attempt>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The cause of a failed attempt, without the `Connection error:` prefix it
/// gets again once handed back to the callers.
fn connection_message(error: CalMirrorError) -> String {
    match error {
        CalMirrorError::Connection(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_attempt(
        counter: Arc<AtomicUsize>,
        succeed: bool,
    ) -> impl FnOnce() -> BoxFuture<'static, CalMirrorResult<()>> {
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if succeed {
                    Ok(())
                } else {
                    Err(CalMirrorError::Connection("refused".into()))
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let manager = Arc::new(ConnectionManager::new(true));
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    manager
                        .ensure_connected(counting_attempt(counter, true))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_failed_attempt_is_not_memoized() {
        let manager = ConnectionManager::new(true);
        let counter = Arc::new(AtomicUsize::new(0));

        let err = manager
            .connect(counting_attempt(counter.clone(), false))
            .await
            .unwrap_err();
        assert!(matches!(err, CalMirrorError::Connection(_)));
        assert_eq!(err.to_string(), "Connection error: refused");
        assert!(!manager.is_connected());

        manager
            .connect(counting_attempt(counter.clone(), true))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_auto_connect_disabled() {
        let manager = ConnectionManager::new(false);
        let counter = Arc::new(AtomicUsize::new(0));

        let err = manager
            .ensure_connected(counting_attempt(counter.clone(), true))
            .await
            .unwrap_err();
        assert!(matches!(err, CalMirrorError::Connection(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Explicit connect still works.
        manager.connect(counting_attempt(counter, true)).await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_other_attempt_errors_keep_their_message() {
        let manager = ConnectionManager::new(true);
        let err = manager
            .connect(|| async { Err::<(), _>(CalMirrorError::Config("no host".into())) }.boxed())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Connection error: Configuration error: no host");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_new_attempt_once_connected_while_waiting_for_slot() {
        let manager = Arc::new(ConnectionManager::new(true));
        let counter = Arc::new(AtomicUsize::new(0));

        let guard = manager.slot();
        let task = tokio::spawn({
            let manager = manager.clone();
            let counter = counter.clone();
            async move { manager.connect(counting_attempt(counter, true)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Another attempt completes while the caller waits on the slot.
        manager.connected.store(true, Ordering::Release);
        drop(guard);

        task.await.unwrap().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
