//! Parallel, fail-fast batch verification of transparent transaction scripts.
//!
//! Block and mempool validation need to know whether *every* transaction in a
//! set has valid scripts. Script checks are CPU-bound and independent of each
//! other, so this crate fans them out across a fixed pool of worker threads,
//! and reports a single aggregate result for the whole batch.
//!
//! ## Usage
//!
//! A [`Dispatcher`] is created once, and reused for each batch:
//!
//! 1. [`Dispatcher::reset`] starts a new batch,
//! 2. [`Dispatcher::verify`] queues one transaction's scripts for verification,
//!    and returns without waiting for the result,
//! 3. [`Dispatcher::yield_success`] waits for every queued job, and returns
//!    `true` if all of them were valid.
//!
//! ## Fail-fast verification
//!
//! A batch is invalid as soon as one of its transactions is invalid. Once a
//! job fails, jobs that have not started yet skip their script checks, because
//! their result can't change the outcome of the batch.
//!
//! Jobs that are already running are never interrupted, and the failure reason
//! is the reason of the *last* job that failed, not the first.
//!
//! ## Synchronous verification
//!
//! A dispatcher with zero threads runs each job on the caller's thread inside
//! [`Dispatcher::verify`]. This produces the same results as the threaded
//! dispatcher, which makes it useful for tests and single-core nodes.
#![doc(html_favicon_url = "https://zfnd.org/wp-content/uploads/2022/03/zebra-favicon-128.png")]
#![doc(html_logo_url = "https://zfnd.org/wp-content/uploads/2022/03/zebra-icon.png")]
#![doc(html_root_url = "https://docs.rs/zebra_batch_verifier")]
#![forbid(unsafe_code)]

mod config;
mod dispatcher;
mod failure;
mod pool;

pub mod error;


pub use config::Config;
pub use dispatcher::{Dispatcher, Job};
pub use error::Error;
pub use failure::FailureState;
pub use pool::WorkerPool;

/// A transaction whose scripts can be verified by a [`Dispatcher`].
///
/// The dispatcher treats script verification as opaque: it only needs a
/// pass/fail answer, and a hash to identify failing transactions in logs and
/// failure reasons.
pub trait Transaction: Send + Sync + 'static {
    /// The script type verified against this transaction.
    type Script: Send + Sync + 'static;

    /// Returns `true` if `scripts` are valid for this transaction.
    ///
    /// `strict_policy` selects the stricter script validation rules, it is
    /// forwarded unchanged from [`Dispatcher::verify`].
    fn verify(&self, scripts: &[Self::Script], strict_policy: bool) -> bool;

    /// Returns a human-readable hash that identifies this transaction.
    fn identifying_hash(&self) -> String;
}
