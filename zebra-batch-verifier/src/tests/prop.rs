//! Randomised property tests for batch script verification.

use std::env;

use proptest::{collection::vec, prelude::*};

use crate::Dispatcher;

use super::{scripts, MockTransaction, CheckCounter};

/// The default number of proptest cases for each test.
///
/// Each case starts new worker threads, so we use fewer cases than usual.
const DEFAULT_BATCH_PROPTEST_CASES: u32 = 32;

/// Verifies a batch with one job per entry in `outcomes`, and returns the
/// batch result, the failure reason, and the number of script checks that ran.
fn verify_batch(threads: usize, outcomes: &[bool]) -> (bool, String, usize) {
    let checks = CheckCounter::default();
    let mut dispatcher = Dispatcher::new(threads).expect("script verification threads start");

    dispatcher.reset();
    for (id, valid) in outcomes.iter().enumerate() {
        dispatcher.verify(scripts(*valid), MockTransaction::new(id, &checks), false);
    }

    let success = dispatcher.yield_success();

    (success, dispatcher.failure_reason(), checks.verifications())
}

proptest! {
    #![proptest_config(
        ProptestConfig::with_cases(env::var("PROPTEST_CASES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BATCH_PROPTEST_CASES))
    )]

    /// The batch is valid exactly when every transaction in it is valid,
    /// and a failed batch names one of its invalid transactions.
    #[test]
    fn batch_result_is_conjunction_of_jobs(
        threads in 0usize..5,
        outcomes in vec(any::<bool>(), 0..40),
    ) {
        let _init_guard = zebra_batch_test::init();

        let (success, reason, verifications) = verify_batch(threads, &outcomes);

        prop_assert_eq!(success, outcomes.iter().all(|valid| *valid));
        prop_assert!(verifications <= outcomes.len());

        if success {
            prop_assert_eq!(reason, "");
        } else {
            let named_invalid = outcomes
                .iter()
                .enumerate()
                .filter(|(_, valid)| !**valid)
                .any(|(id, _)| {
                    reason == format!("Transaction hash: {}", MockTransaction::hash_of(id))
                });

            prop_assert!(named_invalid, "reason should name an invalid transaction: {}", reason);
        }
    }

    /// Verifying on worker threads gives the same result as verifying synchronously.
    #[test]
    fn threads_do_not_change_batch_result(
        threads in 1usize..5,
        outcomes in vec(any::<bool>(), 1..40),
    ) {
        let _init_guard = zebra_batch_test::init();

        let (synchronous, _, synchronous_verifications) = verify_batch(0, &outcomes);
        let (threaded, _, _) = verify_batch(threads, &outcomes);

        prop_assert_eq!(synchronous, threaded);

        // Synchronous batches stop checking scripts at the first invalid transaction.
        let expected_verifications = outcomes
            .iter()
            .position(|valid| !*valid)
            .map_or(outcomes.len(), |first_invalid| first_invalid + 1);
        prop_assert_eq!(synchronous_verifications, expected_verifications);
    }
}
