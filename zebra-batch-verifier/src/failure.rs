//! Shared failure state for a verification batch.

use std::sync::RwLock;

/// Whether a batch has failed, and why.
///
/// Every job in a batch reads this state before running its script checks,
/// so reads take a shared lock, and only failing jobs take the exclusive lock.
///
/// Within a batch, the failed flag only ever changes from `false` to `true`.
/// It is cleared by [`FailureState::reset`] when the next batch starts.
#[derive(Debug, Default)]
pub struct FailureState {
    inner: RwLock<Failure>,
}

#[derive(Debug, Default)]
struct Failure {
    failed: bool,
    reason: String,
}

impl FailureState {
    /// Creates a new, not failed, state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the batch as failed, replacing any previous reason.
    ///
    /// When jobs fail concurrently, the last writer's reason is kept.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let mut failure = self
            .inner
            .write()
            .expect("previous thread panicked while holding the failure state lock");

        failure.failed = true;
        failure.reason = reason.into();
    }

    /// Returns `true` if a job in the current batch has failed.
    pub fn is_failed(&self) -> bool {
        self.inner
            .read()
            .expect("previous thread panicked while holding the failure state lock")
            .failed
    }

    /// Returns the reason for the current batch failure,
    /// or an empty string if the batch hasn't failed.
    pub fn reason(&self) -> String {
        self.inner
            .read()
            .expect("previous thread panicked while holding the failure state lock")
            .reason
            .clone()
    }

    /// Clears the failure flag and reason, ready for a new batch.
    pub fn reset(&self) {
        let mut failure = self
            .inner
            .write()
            .expect("previous thread panicked while holding the failure state lock");

        failure.failed = false;
        failure.reason.clear();
    }
}
