//! Configuration for batch script verification.

use std::{num::NonZeroUsize, thread::available_parallelism};

use serde::{Deserialize, Serialize};

/// Configuration for the batch script verifier.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The number of threads used to verify transaction scripts.
    ///
    /// # Details
    ///
    /// By default, Zebra uses one thread per available CPU core.
    ///
    /// If this option is `0`, scripts are verified on the thread that submits them,
    /// one transaction at a time. This is slower, but it is useful for debugging.
    pub verifier_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verifier_threads: available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
        }
    }
}
