//! Test failures and the early-return signal carried by every test step.
//!
//! A step returns [`TestResult`]. The assertion macros and `?` on heap or
//! patch errors turn a problem into an [`Interrupt`], which the runner's
//! isolation boundary records against the running test.

use std::fmt;
use std::panic::Location;

use serde::Serialize;
use tinyfixture_guard::HeapError;

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A check written by the test author failed, or the test panicked.
    Assertion,
    /// Blocks were still live when the epoch closed.
    Leak,
    /// A guard was damaged, or a block was released twice or never existed.
    Corruption,
    /// The patch stack was full.
    PatchCapacity,
    /// The run itself is misconfigured. Fatal to the whole run.
    Configuration,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assertion => "assertion",
            Self::Leak => "leak",
            Self::Corruption => "corruption",
            Self::PatchCapacity => "patch_capacity",
            Self::Configuration => "configuration",
        }
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration)
    }
}

/// One failure, located at the line that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub file: &'static str,
    /// 0 when the failure has no source location of its own yet.
    pub line: u32,
    pub message: String,
    /// Extra report lines (leak itemization, captured stacks).
    pub details: Vec<String>,
}

impl Failure {
    /// Failure located at the caller.
    #[track_caller]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self::at(kind, location.file(), location.line(), message)
    }

    /// Failure at an explicit location (used by the assertion macros).
    pub fn at(kind: FailureKind, file: &'static str, line: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            file,
            line,
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Give an unlocated failure the given location.
    #[must_use]
    pub fn anchored(mut self, file: &'static str, line: u32) -> Self {
        if self.line == 0 {
            self.file = file;
            self.line = line;
        }
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<HeapError> for Failure {
    fn from(err: HeapError) -> Self {
        let message = err.to_string();
        match err {
            HeapError::Leak(report) => {
                Self::at(FailureKind::Leak, "", 0, message).with_details(report.detail_lines())
            }
            HeapError::ForeignThread { .. } => Self::at(FailureKind::Configuration, "", 0, message),
            HeapError::Overrun { .. }
            | HeapError::Underrun { .. }
            | HeapError::DoubleRelease { .. }
            | HeapError::ForeignPointer { .. } => Self::at(FailureKind::Corruption, "", 0, message),
            HeapError::ZeroSize
            | HeapError::InjectedFailure
            | HeapError::OutOfMemory { .. }
            | HeapError::SizeOverflow => Self::at(FailureKind::Assertion, "", 0, message),
        }
    }
}

/// Early exit from a test step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// The test failed.
    Fail(Failure),
    /// The test asked to be counted as ignored.
    Ignore { file: &'static str, line: u32 },
}

/// Return type of setup, body and teardown steps.
pub type TestResult = Result<(), Interrupt>;

impl From<Failure> for Interrupt {
    fn from(failure: Failure) -> Self {
        Self::Fail(failure)
    }
}

impl From<HeapError> for Interrupt {
    fn from(err: HeapError) -> Self {
        Self::Fail(Failure::from(err))
    }
}

/// Fail the test unless `cond` holds.
#[macro_export]
macro_rules! fixture_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::Interrupt::Fail($crate::Failure::at(
                $crate::FailureKind::Assertion,
                file!(),
                line!(),
                concat!("Expected TRUE Was FALSE: ", stringify!($cond)),
            )));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::core::result::Result::Err($crate::Interrupt::Fail($crate::Failure::at(
                $crate::FailureKind::Assertion,
                file!(),
                line!(),
                format!($($arg)+),
            )));
        }
    };
}

/// Fail the test unless `expected == actual`. Expected value first.
#[macro_export]
macro_rules! fixture_assert_eq {
    ($expected:expr, $actual:expr $(,)?) => {
        match (&$expected, &$actual) {
            (expected, actual) => {
                if !(*expected == *actual) {
                    return ::core::result::Result::Err($crate::Interrupt::Fail(
                        $crate::Failure::at(
                            $crate::FailureKind::Assertion,
                            file!(),
                            line!(),
                            format!("Expected {:?} Was {:?}", expected, actual),
                        ),
                    ));
                }
            }
        }
    };
}

/// Fail the test unconditionally.
#[macro_export]
macro_rules! fixture_fail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::Interrupt::Fail($crate::Failure::at(
            $crate::FailureKind::Assertion,
            file!(),
            line!(),
            format!($($arg)+),
        )))
    };
}

/// Stop the test here and count it as ignored.
#[macro_export]
macro_rules! fixture_ignore {
    () => {
        return ::core::result::Result::Err($crate::Interrupt::Ignore {
            file: file!(),
            line: line!(),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyfixture_guard::ReleaseSite;

    fn checks_truth(value: bool) -> TestResult {
        fixture_assert!(value);
        Ok(())
    }

    fn checks_equality(actual: u32) -> TestResult {
        fixture_assert_eq!(4, actual);
        Ok(())
    }

    fn ignores_itself() -> TestResult {
        fixture_ignore!();
    }

    #[test]
    fn assert_macro_reports_expression_and_location() {
        assert!(checks_truth(true).is_ok());
        let Err(Interrupt::Fail(failure)) = checks_truth(false) else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(failure.message, "Expected TRUE Was FALSE: value");
        assert!(failure.file.ends_with("failure.rs"));
        assert!(failure.line > 0);
    }

    #[test]
    fn assert_eq_macro_names_both_values() {
        assert!(checks_equality(4).is_ok());
        let Err(Interrupt::Fail(failure)) = checks_equality(5) else {
            panic!("expected failure");
        };
        assert_eq!(failure.message, "Expected 4 Was 5");
    }

    #[test]
    fn ignore_macro_interrupts() {
        assert!(matches!(ignores_itself(), Err(Interrupt::Ignore { .. })));
    }

    #[test]
    fn heap_errors_map_to_failure_kinds() {
        let overrun = HeapError::Overrun {
            during: ReleaseSite::Release,
            addr: 0x40,
            size: 3,
            origin: Location::caller(),
        };
        assert_eq!(Failure::from(overrun).kind, FailureKind::Corruption);
        assert_eq!(
            Failure::from(HeapError::InjectedFailure).kind,
            FailureKind::Assertion
        );
        let id = std::thread::current().id();
        let fatal = Failure::from(HeapError::ForeignThread {
            owner: id,
            caller: id,
        });
        assert!(fatal.kind.is_fatal());
    }

    #[test]
    fn anchoring_only_fills_missing_locations() {
        let unlocated = Failure::at(FailureKind::Leak, "", 0, "leak");
        let anchored = unlocated.anchored("suite.rs", 12);
        assert_eq!((anchored.file, anchored.line), ("suite.rs", 12));
        let located = Failure::at(FailureKind::Assertion, "body.rs", 3, "x");
        assert_eq!(located.anchored("suite.rs", 12).line, 3);
    }
}
