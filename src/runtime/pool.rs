use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{Semaphore, oneshot};
use uuid::Uuid;

use crate::runtime::error::Error;
use crate::runtime::handle::TaskHandle;

#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Maximum number of tasks running at once. Defaults to the available
    /// parallelism of the host.
    pub workers: Option<usize>,
}

/// Runs submitted futures on the tokio runtime, at most `workers` at a time.
///
/// Each evaluator call is resource-heavy, so the pool is sized to evaluator
/// capacity rather than to the number of environments.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let workers = config
            .workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get));

        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn `task` once a worker slot is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, task: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => Ok(task.await),
                Err(_) => Err(Error::PoolClosed),
            };
            let _ = sender.send(result);
        });

        TaskHandle::new(task_id, receiver)
    }

    /// Reject tasks that have not started yet. Running tasks finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_worker_count() {
        let pool = WorkerPool::new(PoolConfig { workers: Some(2) });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_task_is_canceled() {
        let pool = WorkerPool::new(PoolConfig { workers: Some(1) });
        let handle = pool.submit(async {
            panic!("boom");
        });
        assert_eq!(handle.await, Err::<(), _>(Error::Canceled));

        // The slot is released again.
        assert_eq!(pool.submit(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn closed_pool_rejects_new_tasks() {
        let pool = WorkerPool::new(PoolConfig { workers: Some(1) });
        pool.close();
        assert_eq!(pool.submit(async { 1 }).await, Err(Error::PoolClosed));
    }

    #[test]
    fn zero_workers_falls_back_to_host() {
        let pool = WorkerPool::new(PoolConfig { workers: Some(0) });
        assert!(pool.workers() >= 1);
    }
}
