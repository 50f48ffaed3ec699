//! Test execution engine.
//!
//! Every selected test goes through three guarded calls:
//! 1. setup then body
//! 2. teardown
//! 3. undo all patches, then close the allocation epoch unless the test
//!    has already failed
//!
//! A guarded call contains whatever happens inside it: an early
//! [`Interrupt`], a panic, or a failure the heap or the patch stack latched
//! while it ran. The next guarded call runs regardless.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tinyfixture_guard::{GuardedHeap, HeapMetricsSnapshot, SharedHeap};

use crate::config::RunConfig;
use crate::console::{Console, Verbosity};
use crate::context::TestContext;
use crate::error::FixtureError;
use crate::failure::{Failure, FailureKind, Interrupt, TestResult};
use crate::fixture::{Fixture, Suite};
use crate::log::{LogEmitter, LogEntry, LogLevel, Outcome, default_run_id};
use crate::patch::PatchStack;

/// Tally of one iteration, or of the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub tests: u32,
    pub failures: u32,
    pub ignored: u32,
}

impl RunCounters {
    fn absorb(&mut self, other: &Self) {
        self.tests = self.tests.saturating_add(other.tests);
        self.failures = self.failures.saturating_add(other.failures);
        self.ignored = self.ignored.saturating_add(other.ignored);
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// One entry per repeat iteration.
    pub iterations: Vec<RunCounters>,
    /// Sum over all iterations.
    pub total: RunCounters,
    pub heap: HeapMetricsSnapshot,
}

impl RunSummary {
    /// Cumulative failures, saturated into the exit status range.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.total.failures).unwrap_or(i32::MAX)
    }
}

/// Outcome of one test so far.
#[derive(Debug, Default)]
struct TestState {
    failure: Option<Failure>,
    fatal: Option<Failure>,
    ignored: bool,
}

impl TestState {
    /// Keep the first failure; remember the first fatal one separately.
    fn fail(&mut self, failure: Failure) {
        if failure.kind.is_fatal() && self.fatal.is_none() {
            self.fatal = Some(failure.clone());
        }
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    fn record(&mut self, result: TestResult, fixture: &Fixture) {
        match result {
            Ok(()) => {}
            Err(Interrupt::Fail(failure)) => self.fail(failure.anchored(fixture.file(), fixture.line())),
            Err(Interrupt::Ignore { .. }) => self.ignored = true,
        }
    }
}

/// Drives a [`Suite`] under one [`RunConfig`].
pub struct Runner {
    config: RunConfig,
    heap: SharedHeap,
    patches: PatchStack,
    console: Console,
    log: Option<LogEmitter>,
    counters: RunCounters,
}

impl Runner {
    /// Runner printing to stdout, heap chosen by the `static-heap` feature.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        let heap = GuardedHeap::default().with_tracking(config.tracking);
        let console = Console::stdout(verbosity_of(&config));
        Self {
            config,
            heap: SharedHeap::new(heap),
            patches: PatchStack::new(),
            console,
            log: None,
            counters: RunCounters::default(),
        }
    }

    /// As [`new`](Self::new), plus the run log named by the configuration.
    ///
    /// # Errors
    ///
    /// `Io` when the log file cannot be created.
    pub fn from_config(config: RunConfig) -> Result<Self, FixtureError> {
        let log = match &config.log_path {
            Some(path) => Some(LogEmitter::to_file(path, &default_run_id())?),
            None => None,
        };
        let mut runner = Self::new(config);
        runner.log = log;
        Ok(runner)
    }

    /// Send console output to `out`.
    #[must_use]
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.console = Console::new(out, verbosity_of(&self.config));
        self
    }

    #[must_use]
    pub fn with_heap(mut self, heap: SharedHeap) -> Self {
        self.heap = heap;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogEmitter) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    /// Run the suite `repeat` times.
    ///
    /// # Errors
    ///
    /// `Fatal` when a test hit a configuration failure (the run stops after
    /// that test's cleanup); `Io`/`Log` when output cannot be written.
    pub fn run(&mut self, suite: &Suite) -> Result<RunSummary, FixtureError> {
        let repeat = self.config.repeat;
        let (provider, tracking) = {
            let heap = self.heap.lock();
            (heap.provider_name(), heap.tracking())
        };
        let filters = json!({
            "group": self.config.group_filter,
            "name": self.config.name_filter,
        });
        self.log(LogLevel::Info, "run_start", |entry| {
            entry.with_details(json!({
                "registered": suite.len(),
                "repeat": repeat,
                "provider": provider,
                "tracking": tracking.as_str(),
                "filters": filters,
            }))
        })?;

        let mut iterations = Vec::with_capacity(repeat as usize);
        let mut total = RunCounters::default();
        for iteration in 1..=repeat {
            self.counters = RunCounters::default();
            self.console.announce_iteration(iteration, repeat)?;
            self.log(LogLevel::Info, "iteration_start", |entry| entry.with_iteration(iteration))?;

            for fixture in suite.fixtures() {
                if let Err(err) = self.run_fixture(fixture, iteration) {
                    total.absorb(&self.counters);
                    self.finish_log(LogLevel::Fatal, &total, err.exit_code())?;
                    return Err(err);
                }
            }

            self.console.summary(&self.counters)?;
            let counters = self.counters;
            self.log(LogLevel::Info, "iteration_end", |entry| {
                entry
                    .with_iteration(iteration)
                    .with_details(json!({ "counters": counters }))
            })?;
            total.absorb(&counters);
            iterations.push(counters);
        }

        let summary = RunSummary {
            iterations,
            total,
            heap: self.heap.lock().metrics(),
        };
        self.finish_log(LogLevel::Info, &total, summary.exit_code())?;
        Ok(summary)
    }

    fn run_fixture(&mut self, fixture: &Fixture, iteration: u32) -> Result<(), FixtureError> {
        if !self.config.selects(fixture.group(), fixture.name()) {
            return Ok(());
        }
        let display = fixture.display_name();
        self.counters.tests += 1;

        if fixture.is_ignored() {
            self.counters.ignored += 1;
            self.console.test_skipped(&display)?;
            return self.log_test_end(fixture, iteration, Outcome::Ignore, None, 0);
        }

        self.heap.lock().start_epoch();
        self.patches.reset_for_test();
        self.console.test_started(&display)?;
        let started = Instant::now();
        let mut state = TestState::default();

        let result = self.protect(fixture, |ctx| fixture.run_setup_and_body(ctx));
        state.record(result, fixture);
        self.drain_latches(&mut state, fixture);

        let result = self.protect(fixture, |ctx| fixture.run_teardown(ctx));
        state.record(result, fixture);
        self.drain_latches(&mut state, fixture);

        let audit = state.failure.is_none();
        let result = self.protect(fixture, |ctx| {
            ctx.undo_patches();
            if audit {
                ctx.heap().end_epoch()?;
            }
            Ok(())
        });
        state.record(result, fixture);
        self.drain_latches(&mut state, fixture);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if state.ignored {
            self.counters.ignored += 1;
            self.console.test_ignored()?;
            self.log_test_end(fixture, iteration, Outcome::Ignore, None, elapsed_ms)?;
        } else if let Some(failure) = &state.failure {
            self.counters.failures += 1;
            self.console.test_failed(&display, failure)?;
            self.log_test_end(fixture, iteration, Outcome::Fail, Some(failure), elapsed_ms)?;
        } else {
            self.console.test_passed(started.elapsed())?;
            self.log_test_end(fixture, iteration, Outcome::Pass, None, elapsed_ms)?;
        }

        match state.fatal {
            Some(fatal) => {
                self.console.fatal(&fatal)?;
                Err(FixtureError::Fatal(fatal))
            }
            None => Ok(()),
        }
    }

    /// The isolation boundary: one guarded call.
    fn protect<F>(&mut self, fixture: &Fixture, step: F) -> TestResult
    where
        F: FnOnce(&mut TestContext<'_>) -> TestResult,
    {
        let mut ctx = TestContext::new(&self.heap, &mut self.patches, fixture.group(), fixture.name());
        match panic::catch_unwind(AssertUnwindSafe(|| step(&mut ctx))) {
            Ok(result) => result,
            Err(payload) => Err(Interrupt::Fail(Failure::at(
                FailureKind::Assertion,
                fixture.file(),
                fixture.line(),
                format!("panicked: {}", panic_message(payload.as_ref())),
            ))),
        }
    }

    /// Fold failures the heap and the patch stack latched during the last
    /// guarded call.
    fn drain_latches(&mut self, state: &mut TestState, fixture: &Fixture) {
        let (fatal, violation) = {
            let mut heap = self.heap.lock();
            (heap.take_fatal(), heap.take_violation())
        };
        for err in [fatal, violation].into_iter().flatten() {
            state.fail(Failure::from(err).anchored(fixture.file(), fixture.line()));
        }
        if let Some(overflow) = self.patches.take_overflow() {
            state.fail(overflow.anchored(fixture.file(), fixture.line()));
        }
    }

    fn log_test_end(
        &mut self,
        fixture: &Fixture,
        iteration: u32,
        outcome: Outcome,
        failure: Option<&Failure>,
        duration_ms: u64,
    ) -> Result<(), FixtureError> {
        let level = match outcome {
            Outcome::Fail => LogLevel::Error,
            Outcome::Pass | Outcome::Ignore => LogLevel::Info,
        };
        self.log(level, "test_end", |entry| {
            let entry = entry
                .with_iteration(iteration)
                .with_test(fixture.group(), fixture.name())
                .with_outcome(outcome)
                .with_duration_ms(duration_ms);
            match failure {
                Some(failure) => entry
                    .with_failure_kind(failure.kind)
                    .with_message(failure.message.as_str())
                    .with_location(failure.file, failure.line),
                None => entry.with_location(fixture.file(), fixture.line()),
            }
        })?;
        if let Some(failure) = failure.filter(|f| f.kind == FailureKind::Leak) {
            for detail in &failure.details {
                self.log(LogLevel::Warn, "leak_detail", |entry| {
                    entry
                        .with_iteration(iteration)
                        .with_test(fixture.group(), fixture.name())
                        .with_message(detail.as_str())
                })?;
            }
        }
        Ok(())
    }

    fn finish_log(
        &mut self,
        level: LogLevel,
        total: &RunCounters,
        exit_code: i32,
    ) -> Result<(), FixtureError> {
        let metrics = self.heap.lock().metrics();
        let heap: serde_json::Map<String, serde_json::Value> = metrics
            .fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), json!(value)))
            .collect();
        self.log(level, "run_end", |entry| {
            entry
                .with_exit_code(exit_code)
                .with_details(json!({ "counters": total, "heap": heap }))
        })?;
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }

    fn log(
        &mut self,
        level: LogLevel,
        event: &str,
        build: impl FnOnce(LogEntry) -> LogEntry,
    ) -> Result<(), FixtureError> {
        if let Some(log) = self.log.as_mut() {
            let entry = build(log.entry(level, event));
            log.emit(&entry)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

fn verbosity_of(config: &RunConfig) -> Verbosity {
    if config.verbose {
        Verbosity::Verbose
    } else if config.shows_progress() {
        Verbosity::Progress
    } else {
        Verbosity::Silent
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
