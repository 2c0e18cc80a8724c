// Bounded worker pool
//
// `schedule` never waits for a free slot: it spawns a task that queues on a
// semaphore with `size` permits, so at most `size` units of work run at once.
// Shutdown either drains queued work or drops whatever has not started yet.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::errors::PoolError;

/// How outstanding work is handled at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let queued and running work finish
    Drain,
    /// Drop queued work, wait only for work already running
    Cancel,
}

pub struct WorkerPool {
    size: usize,
    slots: Arc<Semaphore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `size` worker slots (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Units of work currently holding a slot
    pub fn active(&self) -> usize {
        self.size - self.slots.available_permits()
    }

    /// Units of work waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }

    /// Enqueue work; returns immediately. Must be called from within a
    /// tokio runtime.
    pub fn schedule<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tasks.is_closed() {
            return Err(PoolError::Closed);
        }

        let slots = Arc::clone(&self.slots);
        let shutdown = self.shutdown.clone();
        let queued = Arc::clone(&self.queued);
        queued.fetch_add(1, Ordering::SeqCst);

        self.tasks.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                permit = slots.acquire_owned() => permit.ok(),
            };
            queued.fetch_sub(1, Ordering::SeqCst);

            match permit {
                Some(_permit) => work.await,
                None => tracing::debug!("Dropped queued work at shutdown"),
            }
        });
        Ok(())
    }

    /// Stop accepting work and wait for outstanding tasks
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.tasks.close();
        if mode == ShutdownMode::Cancel {
            self.shutdown.cancel();
        }

        tracing::info!(
            mode = ?mode,
            active = self.active(),
            queued = self.queued(),
            "Worker pool shutting down"
        );
        self.tasks.wait().await;
    }
}
