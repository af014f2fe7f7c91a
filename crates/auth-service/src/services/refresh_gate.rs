//! Per-key single-flight execution.
//!
//! Concurrent `/auth/token` calls for the same session that all see a
//! near-expiry access token must produce one provider refresh, not one
//! each. [`RefreshGate::run`] lets the first caller for a key do the work
//! while later callers for the same key wait and receive a clone of its
//! result. Once the work completes the key is released, so a later call
//! starts fresh.

use crate::errors::AuthError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type Slot<T> = Arc<OnceCell<Result<T, AuthError>>>;

pub struct RefreshGate<T> {
    inflight: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> Default for RefreshGate<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> RefreshGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run for `key` is already in flight,
    /// in which case wait for that run and return its result.
    ///
    /// If the running caller is cancelled, one of the waiters takes over
    /// and runs its own `work`.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<T, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let slot = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = slot.get_or_init(work).await.clone();

        let mut inflight = self.inflight.lock().await;
        if inflight.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            inflight.remove(key);
        }
        result
    }

    /// Number of keys with a run in flight.
    pub async fn inflight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_runs_share_one_execution() {
        let gate = Arc::new(RefreshGate::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    gate.run("session-a", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.inflight().await, 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let gate = Arc::new(RefreshGate::<u32>::new());
        let a = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.run("s", || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(AuthError::Unauthorized("expired".to_string()))
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = gate.run("s", || async { Ok(1) }).await;

        assert_eq!(b, Err(AuthError::Unauthorized("expired".to_string())));
        assert!(a.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let gate = RefreshGate::<&'static str>::new();
        let (a, b) = tokio::join!(
            gate.run("a", || async { Ok("a") }),
            gate.run("b", || async { Ok("b") })
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_sequential_runs_execute_again() {
        let gate = RefreshGate::<usize>::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            gate.run("s", || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst))
            })
            .await
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
