//! Bounded worker concurrency for one stage.
//!
//! Two semaphores split the bookkeeping: `queue` counts submitted tasks that
//! still wait for a worker, `workers` counts tasks currently running. A
//! submission first takes a queue slot (waiting if the queue is full, which is
//! how backpressure reaches the caller), then the spawned task trades that slot
//! for a worker permit. Both semaphores are fair, so queued work starts in
//! submission order.
//!
//! Stopping never interrupts a running task. Tasks still waiting in the queue
//! are discarded without being started.

use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::error::{Error, Result};

pub struct WorkerPool {
    workers: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    stopping: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Creates a pool running at most `workers` tasks at once, with room for
    /// `capacity` more waiting. A capacity of zero is treated as one.
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        Ok(Self {
            workers: Arc::new(Semaphore::new(workers)),
            queue: Arc::new(Semaphore::new(capacity.max(1))),
            stopping: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Submits a task, waiting while the queue is full.
    ///
    /// Fails only once the pool has been stopped.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self
            .queue
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolStopped)?;

        let workers = self.workers.clone();
        let stopping = self.stopping.clone();
        self.tracker.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = stopping.cancelled() => return,
                permit = workers.acquire_owned() => permit,
            };
            // The worker semaphore is never closed.
            let Ok(_permit) = permit else {
                return;
            };
            drop(slot);
            task.await;
        });
        Ok(())
    }

    /// Number of submitted tasks that have not finished or been discarded.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Refuses further submissions, discards queued tasks and waits for the
    /// running ones to finish.
    pub async fn stop(&self) {
        self.queue.close();
        self.stopping.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn zero_workers_is_a_config_error() {
        assert!(matches!(WorkerPool::new(0, 10), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let pool = WorkerPool::new(3, 100).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = running.clone();
            let peak = peak.clone();
            let finished = finished.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        while finished.load(Ordering::SeqCst) < 20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pool.stop().await;

        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_running_tasks_and_discards_queued_ones() {
        let pool = WorkerPool::new(2, 50).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        // Let the first two pick up a worker.
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.stop().await;

        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn submit_waits_when_queue_is_full() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Occupies the only worker until released.
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Sits in the only queue slot.
        pool.submit(async {}).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.submit(async {})).await;
        assert!(blocked.is_err(), "third submission should wait for a slot");

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_millis(500), pool.submit(async {}))
            .await
            .unwrap()
            .unwrap();
        pool.stop().await;
    }

    #[tokio::test]
    async fn submit_after_stop_is_refused() {
        let pool = WorkerPool::new(1, 1).unwrap();
        pool.stop().await;
        assert!(matches!(pool.submit(async {}).await, Err(Error::PoolStopped)));
    }
}
