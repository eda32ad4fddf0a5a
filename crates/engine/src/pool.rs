//! Bounded dispatch pool with a two-phase drain
//!
//! A pool is created per client batch and runs at most `size` jobs at a time. Draining
//! stops new submissions, waits one grace period for running jobs, then cancels whatever is
//! left and waits one more grace period before giving up on stragglers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Pool errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down and no longer accepts jobs
    #[error("dispatch pool is shut down")]
    Closed,
}

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every job finished within the first grace period
    Completed,
    /// Outstanding jobs were cancelled and acknowledged the cancellation
    Forced,
    /// Some jobs did not stop even after cancellation
    Abandoned { outstanding: usize },
}

/// Results gathered by a drain
#[derive(Debug)]
pub struct DrainReport<T> {
    pub outcome: DrainOutcome,
    /// Results of jobs that ran to completion
    pub results: Vec<T>,
    /// Jobs that panicked
    pub panicked: usize,
}

/// Fixed-size pool of concurrently running jobs
///
/// # Example
///
/// ```ignore
/// use status_pusher_engine::{DispatchPool, DrainOutcome};
/// use std::time::Duration;
///
/// let mut pool = DispatchPool::new(DispatchPool::<u32>::size_for(30, 10));
/// for i in 0..30 {
///     pool.submit(async move { i }).unwrap();
/// }
/// let report = pool.shutdown_and_await(Duration::from_secs(5)).await;
/// assert_eq!(report.outcome, DrainOutcome::Completed);
/// assert_eq!(report.results.len(), 30);
/// ```
pub struct DispatchPool<T> {
    tasks: JoinSet<T>,
    permits: Arc<Semaphore>,
    size: usize,
    closed: bool,
}

impl<T: Send + 'static> DispatchPool<T> {
    /// Create a pool running at most `size` jobs at once
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(size)),
            size,
            closed: false,
        }
    }

    /// Pool size for a batch: one worker per record up to the cap
    pub fn size_for(batch_len: usize, max_workers: usize) -> usize {
        batch_len.min(max_workers).max(1)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted and not yet collected
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed
    }

    /// Queue a job; it starts as soon as a worker slot is free
    pub fn submit<F>(&mut self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        if self.closed {
            return Err(PoolError::Closed);
        }

        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            job.await
        });
        Ok(())
    }

    /// Stop accepting new jobs
    pub fn shutdown(&mut self) {
        self.closed = true;
    }

    /// Stop accepting jobs and wait for the queued ones
    pub async fn shutdown_and_await(&mut self, grace: Duration) -> DrainReport<T> {
        self.shutdown();
        let mut report = DrainReport {
            outcome: DrainOutcome::Completed,
            results: Vec::with_capacity(self.tasks.len()),
            panicked: 0,
        };

        if timeout(grace, self.collect(&mut report)).await.is_ok() {
            debug!(completed = report.results.len(), "pool drained");
            return report;
        }

        warn!(
            outstanding = self.tasks.len(),
            grace_secs = grace.as_secs(),
            "pool did not drain in time, cancelling outstanding jobs"
        );
        self.tasks.abort_all();

        report.outcome = if timeout(grace, self.collect(&mut report)).await.is_ok() {
            DrainOutcome::Forced
        } else {
            let outstanding = self.tasks.len();
            error!(outstanding, "pool did not terminate after cancellation");
            DrainOutcome::Abandoned { outstanding }
        };
        report
    }

    async fn collect(&mut self, report: &mut DrainReport<T>) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => report.results.push(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!(error = %e, "job panicked");
                    report.panicked += 1;
                }
            }
        }
    }
}
