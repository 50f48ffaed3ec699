//! Minimal fixture runner for unit tests on constrained targets.
//!
//! This crate provides:
//! - Fixture registration: groups of tests with shared setup and teardown
//! - Protected execution: every test runs setup+body, teardown and cleanup as
//!   three guarded calls, so one failing step never skips the next
//! - Guarded allocation: leaks, overruns and double releases made through the
//!   test's heap are reported against the test (see [`tinyfixture_guard`])
//! - Global patches: [`Patchable`] values a test may overwrite, restored
//!   after the test whatever its outcome
//! - Console and JSONL reporting, substring filters and repeated runs
//!
//! ```no_run
//! use tinyfixture::{Suite, TestGroup, fixture_assert, fixture_main};
//!
//! let suite = Suite::new().group(TestGroup::new("heap").test("balanced", |ctx| {
//!     let p = ctx.heap().allocate(16)?;
//!     ctx.heap().release(p.as_ptr())?;
//!     fixture_assert!(ctx.heap().live_blocks() == 0);
//!     Ok(())
//! }));
//! std::process::exit(fixture_main(&suite));
//! ```

pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod failure;
pub mod fixture;
pub mod log;
pub mod patch;
pub mod runner;

pub use config::RunConfig;
pub use console::{CaptureBuffer, Console, Verbosity};
pub use context::TestContext;
pub use error::FixtureError;
pub use failure::{Failure, FailureKind, Interrupt, TestResult};
pub use fixture::{Fixture, Suite, TestGroup};
pub use log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use patch::{PATCH_CAPACITY, PatchStack, Patchable};
pub use runner::{RunCounters, RunSummary, Runner};
pub use tinyfixture_guard;

/// Highest process exit status; larger failure counts saturate here so the
/// low byte a parent process sees is never zero.
pub const MAX_EXIT_STATUS: i32 = 255;

/// Run `suite` with the process arguments and environment; returns the exit status.
#[must_use]
pub fn fixture_main(suite: &Suite) -> i32 {
    run_with_args(suite, std::env::args().skip(1))
}

/// As [`fixture_main`] with explicit arguments (program name excluded).
///
/// The status is the cumulative failure count capped at
/// [`MAX_EXIT_STATUS`], or the error's code when the run could not complete.
#[must_use]
pub fn run_with_args<I, S>(suite: &Suite, args: I) -> i32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let result = RunConfig::from_args(args)
        .map(RunConfig::with_env)
        .and_then(Runner::from_config)
        .and_then(|mut runner| runner.run(suite));
    let status = match result {
        Ok(summary) => summary.exit_code(),
        Err(err) => {
            eprintln!("tinyfixture: {err}");
            err.exit_code()
        }
    };
    status.min(MAX_EXIT_STATUS)
}
