//! A fixed-size pool of long-lived script verification threads.

use std::{any::Any, sync::mpsc};

use crate::Error;

/// A fixed set of worker threads, draining a shared first-in, first-out task queue.
///
/// Threads are started by [`WorkerPool::start`], and stopped by [`WorkerPool::stop`],
/// which is also called when the pool is dropped.
#[derive(Debug)]
pub struct WorkerPool {
    /// The underlying thread pool, `None` after the pool has been stopped.
    pool: Option<rayon::ThreadPool>,

    /// Receives the index of each worker thread as it exits.
    exited: mpsc::Receiver<usize>,

    /// The number of worker threads started by this pool.
    threads: usize,
}

impl WorkerPool {
    /// Starts `threads` worker threads.
    ///
    /// Returns an error if `threads` is zero, or if the threads can't be spawned.
    pub fn start(threads: usize) -> Result<Self, Error> {
        // rayon treats zero threads as "use the default thread count"
        if threads == 0 {
            return Err(Error::ZeroThreads);
        }

        let (exit_tx, exited) = mpsc::channel();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("script-verify-{index}"))
            .panic_handler(log_task_panic)
            .exit_handler(move |index| {
                // The receiver is gone if the pool is being leaked, so nobody is waiting.
                let _ = exit_tx.send(index);
            })
            .build()?;

        tracing::info!(threads, "started script verification threads");

        Ok(Self {
            pool: Some(pool),
            exited,
            threads,
        })
    }

    /// Returns the number of worker threads started by this pool.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Returns `true` if the pool has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.pool.is_none()
    }

    /// Queues `task` to run on the next free worker thread.
    ///
    /// Tasks start in the order they were queued. This method never blocks.
    ///
    /// Tasks queued after the pool has stopped are dropped without running.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.pool {
            Some(pool) => pool.spawn_fifo(task),
            None => {
                tracing::warn!("dropping task queued after script verification threads stopped")
            }
        }
    }

    /// Stops the worker threads, and waits until every worker has finished its work loop.
    ///
    /// Tasks that were already queued run to completion before the workers finish.
    /// The OS threads return right after their work loop, without touching any task state.
    /// Calling this method again after the pool has stopped does nothing.
    ///
    /// Must not be called from one of this pool's worker threads.
    pub fn stop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };

        // Dropping the pool tells the threads to exit once the queue is empty.
        drop(pool);

        for _ in 0..self.threads {
            if self.exited.recv().is_err() {
                break;
            }
        }

        tracing::info!(threads = self.threads, "stopped script verification threads");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Logs a panic from a pool task.
///
/// The worker thread that ran the task keeps serving the queue.
fn log_task_panic(panic: Box<dyn Any + Send>) {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("<non string panic payload>");

    tracing::error!(?message, "script verification task panicked");
}
