//! Bounded task pool.
//!
//! A thin wrapper over a semaphore: `try_spawn` runs a future on the
//! runtime only when a permit is free, otherwise the caller gets
//! `PoolSaturated` back immediately. Rejected work is never queued or
//! retried; under load, dropping new work bounds memory and task count.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::RelayError;

/// Fixed-capacity pool of concurrently running tasks.
pub struct TaskPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl TaskPool {
    /// Create a pool with a hard cap on concurrently running tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Spawn `task` if the pool has a free slot.
    ///
    /// Non-blocking: at capacity this returns `PoolSaturated` and drops
    /// `task`, which closes any sockets the future owns. An accepted
    /// task holds its permit until it finishes.
    pub fn try_spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, RelayError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| RelayError::PoolSaturated)?;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn rejects_when_saturated() {
        let pool = TaskPool::new(2);
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();

        let h1 = pool
            .try_spawn(async move {
                rx1.await.ok();
            })
            .unwrap();
        let h2 = pool
            .try_spawn(async move {
                rx2.await.ok();
            })
            .unwrap();
        assert_eq!(pool.available(), 0);

        assert!(matches!(
            pool.try_spawn(async {}),
            Err(RelayError::PoolSaturated)
        ));

        tx1.send(()).unwrap();
        tx2.send(()).unwrap();
        h1.await.unwrap();
        h2.await.unwrap();

        // Permits return once the tasks are done.
        assert_eq!(pool.available(), 2);
        pool.try_spawn(async {}).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn accepted_tasks_run_to_completion() {
        let pool = TaskPool::new(4);
        let ran = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let mut handles = Vec::new();
        let mut rx = Some(rx);
        for _ in 0..4 {
            let ran = ran.clone();
            let gate = rx.take();
            handles.push(
                pool.try_spawn(async move {
                    if let Some(gate) = gate {
                        gate.await.ok();
                    }
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap(),
            );
        }
        // Excess submission is rejected without blocking...
        assert!(pool.try_spawn(async {}).is_err());

        // ...while every accepted task still finishes.
        tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }
}
