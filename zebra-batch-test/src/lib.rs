//! Test harnesses for Zebra's batch script verifier.
#![doc(html_favicon_url = "https://www.zfnd.org/images/zebra-favicon-128.png")]
#![doc(html_logo_url = "https://www.zfnd.org/images/zebra-icon.png")]
#![doc(html_root_url = "https://doc.zebra.zfnd.org/zebra_batch_test")]
// Standard lints
#![warn(missing_docs)]
#![allow(clippy::try_err)]
#![forbid(unsafe_code)]

use color_eyre::section::PanicMessage;
use owo_colors::OwoColorize;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use std::sync::Once;

pub mod prelude;

static INIT: Once = Once::new();

/// Initialize globals for tests: the tracing subscriber, and the panic and
/// error reporting hooks.
///
/// Safe to call from every test, only the first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        // Worker thread names identify which pool thread logged an event.
        let fmt_layer = fmt::layer().with_target(false).with_thread_names(true);

        // Use the RUST_LOG env var, or by default:
        //  - warn for most tests, and
        //  - hide the expected panic logs from tests that make jobs panic
        let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new("warn")
                .unwrap()
                .add_directive("zebra_batch_verifier::pool=off".parse().unwrap())
        });

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::config::HookBuilder::default()
            .add_frame_filter(Box::new(|frames| {
                let mut displayed = std::collections::HashSet::new();
                let filters = &[
                    "rayon_core::",
                    "std::panic",
                    "test::run_test_in_process",
                    "core::ops::function::FnOnce::call_once",
                    "<alloc::boxed::Box",
                    "<std::panic::AssertUnwindSafe",
                    "core::result::Result",
                    "test::assert_test_result",
                ];

                frames.retain(|frame| {
                    // Drop frames we have already shown, then frames from the harness.
                    if !displayed.insert((frame.lineno, frame.filename.clone())) {
                        return false;
                    }

                    match frame.name.as_deref() {
                        Some(name) => !filters.iter().any(|f| name.starts_with(f)),
                        None => true,
                    }
                });
            }))
            .panic_message(SkipTestReturnedErrPanicMessages)
            .install()
            .unwrap();
    })
}

/// Hides the panic that the test harness raises for tests returning `Err`,
/// because the harness has already printed the error report.
struct SkipTestReturnedErrPanicMessages;

impl PanicMessage for SkipTestReturnedErrPanicMessages {
    fn display(
        &self,
        pi: &std::panic::PanicHookInfo<'_>,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let payload = pi
            .payload()
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| pi.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<non string panic payload>");

        if payload.contains("the test returned a termination value with a non-zero status code") {
            return write!(f, "---- end of test output ----");
        }

        writeln!(f, "{}", "\nThe test panicked.".red())?;
        writeln!(f, "Message:  {}", payload.cyan())?;

        match pi.location() {
            Some(loc) => write!(f, "Location: {}:{}", loc.file().purple(), loc.line().purple()),
            None => write!(f, "Location: <unknown>"),
        }
    }
}
