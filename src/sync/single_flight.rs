//! Coalesce concurrent identical operations into one execution.
//!
//! Callers that arrive while an operation is in flight await the same shared
//! future instead of starting their own. The slot is cleared once the shared
//! operation settles, so a later caller starts fresh.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

pub struct SingleFlight<T, E> {
    inflight: Mutex<Option<Shared<BoxFuture<'static, Result<T, E>>>>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    /// Run `make()` unless an execution is already in flight, in which case
    /// await that one's result instead.
    pub async fn run<F, Fut>(&self, make: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fut = make().boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = shared.clone().await;

        // Clear on settle, but only our own execution: a newer in-flight
        // operation must not be evicted by a late-returning awaiter.
        let mut slot = self.inflight.lock().await;
        if let Some(current) = slot.as_ref() {
            if Shared::ptr_eq(current, &shared) {
                *slot = None;
            }
        }

        result
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight: SingleFlight<String, String> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        let calls = (0..5).map(|_| {
            let executions = executions.clone();
            flight.run(move || async move {
                executions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>("token".to_string())
            })
        });

        // Polled concurrently in one task, so every call observes the first
        // one's in-flight future.
        let results = futures::future::join_all(calls).await;
        for result in results {
            assert_eq!(result.unwrap(), "token");
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slot_clears_after_settle() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();

        let first = flight.run(|| async { Ok::<_, String>(1) }).await.unwrap();
        let second = flight.run(|| async { Ok::<_, String>(2) }).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        let make = || {
            let executions = executions.clone();
            flight.run(move || async move {
                executions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<u32, _>("boom".to_string())
            })
        };

        let (a, b) = tokio::join!(make(), make());
        assert_eq!(a.unwrap_err(), "boom");
        assert_eq!(b.unwrap_err(), "boom");
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
