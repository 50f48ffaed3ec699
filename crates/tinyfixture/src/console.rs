//! Console presentation of a run.
//!
//! Default mode prints one glyph per test (`.` run, `!` ignored); verbose
//! prints each display name followed by `PASS (N ms)`; silent prints only the
//! iteration banners and summaries. Failures are reported as
//! `file:line:TEST(group, name):FAIL: message`.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::failure::Failure;
use crate::runner::RunCounters;

/// Width of the rule printed above each summary.
const RULE: &str = "-----------------------";

/// Output verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Silent,
    Progress,
    Verbose,
}

pub struct Console {
    out: Box<dyn Write>,
    verbosity: Verbosity,
}

impl Console {
    #[must_use]
    pub fn new(out: Box<dyn Write>, verbosity: Verbosity) -> Self {
        Self { out, verbosity }
    }

    #[must_use]
    pub fn stdout(verbosity: Verbosity) -> Self {
        Self::new(Box::new(io::stdout()), verbosity)
    }

    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn announce_iteration(&mut self, iteration: u32, total: u32) -> io::Result<()> {
        writeln!(self.out, "Test run {iteration} of {total}")
    }

    pub fn test_started(&mut self, display_name: &str) -> io::Result<()> {
        match self.verbosity {
            Verbosity::Verbose => write!(self.out, "{display_name}"),
            Verbosity::Progress => write!(self.out, "."),
            Verbosity::Silent => Ok(()),
        }
    }

    /// A fixture registered as ignored.
    pub fn test_skipped(&mut self, display_name: &str) -> io::Result<()> {
        match self.verbosity {
            Verbosity::Verbose => writeln!(self.out, "{display_name}"),
            Verbosity::Progress => write!(self.out, "!"),
            Verbosity::Silent => Ok(()),
        }
    }

    /// A test that ignored itself while running.
    pub fn test_ignored(&mut self) -> io::Result<()> {
        match self.verbosity {
            Verbosity::Verbose => writeln!(self.out, " IGNORED"),
            Verbosity::Progress => writeln!(self.out),
            Verbosity::Silent => Ok(()),
        }
    }

    pub fn test_passed(&mut self, elapsed: Duration) -> io::Result<()> {
        if self.verbosity == Verbosity::Verbose {
            writeln!(self.out, " PASS ({} ms)", elapsed.as_millis())?;
        }
        Ok(())
    }

    pub fn test_failed(&mut self, display_name: &str, failure: &Failure) -> io::Result<()> {
        if self.verbosity == Verbosity::Silent {
            return Ok(());
        }
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{}:{}:{display_name}:FAIL: {}",
            failure.file, failure.line, failure.message
        )?;
        for detail in &failure.details {
            writeln!(self.out, "  {detail}")?;
        }
        Ok(())
    }

    /// Close an iteration: line break after progress glyphs, then the tally.
    pub fn summary(&mut self, counters: &RunCounters) -> io::Result<()> {
        if self.verbosity != Verbosity::Verbose {
            writeln!(self.out)?;
        }
        writeln!(self.out, "{RULE}")?;
        writeln!(
            self.out,
            "{} Tests {} Failures {} Ignored",
            counters.tests, counters.failures, counters.ignored
        )?;
        writeln!(self.out, "{}", if counters.failures == 0 { "OK" } else { "FAIL" })?;
        self.out.flush()
    }

    pub fn fatal(&mut self, failure: &Failure) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{}:{}:FATAL: {}",
            failure.file, failure.line, failure.message
        )?;
        self.out.flush()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

/// In-memory sink that stays readable after being handed to a [`Console`].
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl CaptureBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
