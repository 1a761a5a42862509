//! Dispatches script verification jobs to worker threads, and collects their results.

use std::{fmt, sync::Arc};

use futures::future::join_all;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::{Config, Error, FailureState, Transaction, WorkerPool};

/// A script verification job: a transaction, and the scripts to verify against it.
pub struct Job<T: Transaction> {
    scripts: Vec<T::Script>,
    transaction: Arc<T>,
    strict_policy: bool,
}

impl<T: Transaction> Job<T> {
    /// Creates a new job.
    pub fn new(scripts: Vec<T::Script>, transaction: Arc<T>, strict_policy: bool) -> Self {
        Self {
            scripts,
            transaction,
            strict_policy,
        }
    }

    /// Returns the transaction verified by this job.
    pub fn transaction(&self) -> &Arc<T> {
        &self.transaction
    }

    /// Returns the scripts verified by this job.
    pub fn scripts(&self) -> &[T::Script] {
        &self.scripts
    }

    /// Returns `true` if this job uses the strict script validation rules.
    pub fn strict_policy(&self) -> bool {
        self.strict_policy
    }

    /// Verifies this job's scripts, unless the batch has already failed.
    ///
    /// Returns `false` if the scripts are invalid. Also returns `true` if
    /// verification was skipped, because a skipped job can't change the
    /// outcome of an already failed batch.
    ///
    /// Invalid scripts mark the whole batch as failed.
    fn run(&self, failure: &FailureState) -> bool {
        if failure.is_failed() {
            tracing::trace!("skipping script verification: the batch has already failed");
            metrics::counter!("script.batch.skipped").increment(1);

            return true;
        }

        if self.transaction.verify(&self.scripts, self.strict_policy) {
            metrics::counter!("script.batch.verified").increment(1);

            true
        } else {
            let reason = failure_reason(self.transaction.as_ref());

            tracing::debug!(
                %reason,
                strict_policy = self.strict_policy,
                "invalid transaction scripts",
            );
            metrics::counter!("script.batch.invalid").increment(1);

            failure.mark_failed(reason);

            false
        }
    }
}

impl<T: Transaction> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("transaction", &self.transaction().identifying_hash())
            .field("scripts", &self.scripts().len())
            .field("strict_policy", &self.strict_policy())
            .finish()
    }
}

/// The batch failure reason for an invalid `transaction`.
fn failure_reason<T: Transaction>(transaction: &T) -> String {
    format!("Transaction hash: {}", transaction.identifying_hash())
}

/// A job that was sent to the worker threads.
enum PendingVerification {
    /// The job hasn't sent its result yet.
    Running {
        receiver: oneshot::Receiver<bool>,

        /// Builds the failure reason, if the job exits without a result.
        failure_reason: Box<dyn Fn() -> String + Send + Sync>,
    },

    /// The job's result, kept so the batch can be waited for more than once.
    Finished(bool),
}

impl PendingVerification {
    /// Waits for the job's result.
    ///
    /// A job that exits without sending a result, because it panicked or was
    /// dropped, fails the batch.
    async fn wait(&mut self, failure: &FailureState) -> bool {
        if let PendingVerification::Running {
            receiver,
            failure_reason,
        } = self
        {
            let outcome = match receiver.await {
                Ok(outcome) => outcome,
                Err(_closed) => {
                    Self::exited_without_result(&**failure_reason, failure);
                    false
                }
            };

            *self = PendingVerification::Finished(outcome);
        }

        match self {
            PendingVerification::Finished(outcome) => *outcome,
            PendingVerification::Running { .. } => unreachable!("just finished the job"),
        }
    }

    /// Collects the job's result if it is available, without waiting.
    ///
    /// Returns `false` if the job is still running.
    fn try_finish(&mut self, failure: &FailureState) -> bool {
        if let PendingVerification::Running {
            receiver,
            failure_reason,
        } = self
        {
            let outcome = match receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Closed) => {
                    Self::exited_without_result(&**failure_reason, failure);
                    false
                }
            };

            *self = PendingVerification::Finished(outcome);
        }

        true
    }

    fn exited_without_result(
        failure_reason: &(dyn Fn() -> String + Send + Sync),
        failure: &FailureState,
    ) {
        let reason = format!("{}: verification task exited without a result", failure_reason());

        tracing::debug!(%reason, "script verification job exited without a result");
        failure.mark_failed(reason);
    }
}

/// Verifies batches of transaction scripts in parallel.
///
/// Each batch starts with [`Dispatcher::reset`], then queues jobs with
/// [`Dispatcher::verify`], and ends with [`Dispatcher::yield_success`].
///
/// Dropping the dispatcher waits for any queued jobs, then stops its threads.
pub struct Dispatcher {
    /// The worker threads, or `None` if scripts are verified on the caller's thread.
    pool: Option<WorkerPool>,

    /// The failure state of the current batch, shared with all its jobs.
    failure: Arc<FailureState>,

    /// The jobs queued in the current batch.
    pending: Vec<PendingVerification>,
}

impl Dispatcher {
    /// Creates a dispatcher that verifies scripts using `threads` worker threads.
    ///
    /// If `threads` is zero, scripts are verified synchronously inside
    /// [`Dispatcher::verify`].
    pub fn new(threads: usize) -> Result<Self, Error> {
        let pool = match threads {
            0 => {
                tracing::info!("verifying scripts on the caller's thread");
                None
            }
            threads => Some(WorkerPool::start(threads)?),
        };

        Ok(Self {
            pool,
            failure: Arc::new(FailureState::new()),
            pending: Vec::new(),
        })
    }

    /// Creates a dispatcher using the thread count in `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(config.verifier_threads)
    }

    /// Returns the number of worker threads, which is zero for synchronous dispatchers.
    pub fn thread_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::threads)
    }

    /// Returns `true` if this dispatcher verifies scripts on the caller's thread.
    pub fn is_synchronous(&self) -> bool {
        self.pool.is_none()
    }

    /// Returns the number of jobs queued on worker threads since the last reset.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Starts a new batch, clearing the failure state and queued jobs of the previous batch.
    ///
    /// # Panics
    ///
    /// If any job from the previous batch is still running. Call
    /// [`Dispatcher::yield_success`] before starting a new batch.
    pub fn reset(&mut self) {
        let failure = &self.failure;
        let running = self
            .pending
            .iter_mut()
            .map(|pending| pending.try_finish(failure))
            .filter(|finished| !finished)
            .count();

        assert_eq!(
            running, 0,
            "dispatcher was reset with {running} script verification jobs still running, \
             wait for the previous batch using yield_success() before resetting",
        );

        if self.failure.is_failed() {
            tracing::debug!(
                reason = %self.failure.reason(),
                jobs = self.pending.len(),
                "resetting after a failed script verification batch",
            );
        }

        self.failure.reset();
        self.pending.clear();
    }

    /// Queues `scripts` for verification against `transaction`.
    ///
    /// With worker threads, this method returns immediately, and the result is
    /// available from [`Dispatcher::yield_success`]. Synchronous dispatchers
    /// verify the scripts before returning.
    ///
    /// If the batch has already failed, the scripts are not verified.
    pub fn verify<T: Transaction>(
        &mut self,
        scripts: Vec<T::Script>,
        transaction: Arc<T>,
        strict_policy: bool,
    ) {
        self.submit(Job::new(scripts, transaction, strict_policy));
    }

    /// Queues `job` for verification. See [`Dispatcher::verify`] for details.
    pub fn submit<T: Transaction>(&mut self, job: Job<T>) {
        let Some(pool) = &self.pool else {
            job.run(&self.failure);
            return;
        };

        let (tx, receiver) = oneshot::channel();
        let failure = self.failure.clone();
        let transaction = job.transaction().clone();

        self.pending.push(PendingVerification::Running {
            receiver,
            failure_reason: Box::new(move || failure_reason(transaction.as_ref())),
        });

        pool.spawn(move || {
            let outcome = job.run(&failure);

            // The dispatcher was reset or dropped without waiting, so nobody wants the result.
            let _ = tx.send(outcome);
        });

        metrics::counter!("script.batch.dispatched").increment(1);
    }

    /// Waits for every job in the current batch, then returns `true` if the batch is valid.
    ///
    /// Jobs are waited for in any order. This method can be called again
    /// without new jobs, and returns the same result.
    ///
    /// Blocks the current thread. In async code, use [`Dispatcher::wait_for_batch`].
    pub fn yield_success(&mut self) -> bool {
        futures::executor::block_on(self.wait_for_batch())
    }

    /// Waits for every job in the current batch, then returns `true` if the batch is valid.
    ///
    /// This is the async equivalent of [`Dispatcher::yield_success`].
    pub async fn wait_for_batch(&mut self) -> bool {
        tracing::trace!(jobs = self.pending.len(), "waiting for script verification batch");

        let failure = &self.failure;
        join_all(self.pending.iter_mut().map(|pending| pending.wait(failure))).await;

        !self.already_failed()
    }

    /// Waits for the current batch like [`Dispatcher::yield_success`], returning
    /// [`Error::BatchFailed`] with the failure reason if the batch is invalid.
    pub fn outcome(&mut self) -> Result<(), Error> {
        if self.yield_success() {
            Ok(())
        } else {
            Err(Error::BatchFailed {
                reason: self.failure_reason(),
            })
        }
    }

    /// Returns `true` if a job in the current batch has failed.
    ///
    /// Jobs can still be running, so a batch that hasn't failed yet can fail later.
    pub fn already_failed(&self) -> bool {
        self.failure.is_failed()
    }

    /// Marks the current batch as failed with `reason`, replacing any previous reason.
    pub fn failed_with_reason(&self, reason: impl Into<String>) {
        self.failure.mark_failed(reason);
    }

    /// Returns the reason for the current batch failure, or an empty string
    /// if the batch hasn't failed.
    pub fn failure_reason(&self) -> String {
        self.failure.reason()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pool", &self.pool)
            .field("failure", &self.failure)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Stop the threads while the batch state is still alive.
        if let Some(pool) = self.pool.as_mut() {
            pool.stop();
        }
    }
}
