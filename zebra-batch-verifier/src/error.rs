//! Errors that can occur when starting a dispatcher, or checking a batch.

use thiserror::Error;

/// An error from the batch script verifier.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The worker threads could not be started.
    #[error("could not start script verification threads")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A worker pool was requested with no threads.
    ///
    /// Zero-thread dispatchers verify synchronously, and don't have a pool.
    #[error("a script verification pool needs at least one thread")]
    ZeroThreads,

    /// At least one transaction in the batch had invalid scripts.
    #[error("batch script verification failed: {reason}")]
    BatchFailed {
        /// The reason recorded by the last job that failed.
        reason: String,
    },
}

impl Error {
    /// Returns `true` if this error means that the batch was invalid,
    /// rather than the verifier being unable to run.
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, Error::BatchFailed { .. })
    }
}
