//! Fixture registration.
//!
//! Tests are registered per group. A group carries an optional setup and
//! teardown shared by all of its tests; registration order is run order.
//!
//! ```
//! use tinyfixture::{Suite, TestGroup, fixture_assert_eq};
//!
//! let suite = Suite::new().group(
//!     TestGroup::new("math")
//!         .test("adds", |_ctx| {
//!             fixture_assert_eq!(4, 2 + 2);
//!             Ok(())
//!         })
//!         .ignore("divides", |_ctx| Ok(())),
//! );
//! assert_eq!(suite.len(), 2);
//! ```

use std::fmt;
use std::panic::Location;
use std::rc::Rc;

use crate::context::TestContext;
use crate::failure::TestResult;

/// One step of a test: setup, body or teardown.
pub type Step = Rc<dyn Fn(&mut TestContext<'_>) -> TestResult>;

/// A registered test case.
#[derive(Clone)]
pub struct Fixture {
    group: String,
    name: String,
    file: &'static str,
    line: u32,
    ignored: bool,
    setup: Option<Step>,
    body: Step,
    teardown: Option<Step>,
}

impl Fixture {
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the test was registered.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Registered as disabled; selected ignored fixtures are counted, never run.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// `TEST(group, name)`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("TEST({}, {})", self.group, self.name)
    }

    pub(crate) fn run_setup_and_body(&self, ctx: &mut TestContext<'_>) -> TestResult {
        if let Some(setup) = &self.setup {
            setup(ctx)?;
        }
        (self.body)(ctx)
    }

    pub(crate) fn run_teardown(&self, ctx: &mut TestContext<'_>) -> TestResult {
        match &self.teardown {
            Some(teardown) => teardown(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("ignored", &self.ignored)
            .finish_non_exhaustive()
    }
}

/// Builder for the tests of one group.
pub struct TestGroup {
    name: String,
    setup: Option<Step>,
    teardown: Option<Step>,
    fixtures: Vec<Fixture>,
}

impl TestGroup {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setup: None,
            teardown: None,
            fixtures: Vec::new(),
        }
    }

    /// Run before every test body of this group.
    ///
    /// Applies to tests registered after this call.
    #[must_use]
    pub fn setup(mut self, step: impl Fn(&mut TestContext<'_>) -> TestResult + 'static) -> Self {
        self.setup = Some(Rc::new(step));
        self
    }

    /// Run after every test of this group, even a failed one.
    ///
    /// Applies to tests registered after this call.
    #[must_use]
    pub fn teardown(mut self, step: impl Fn(&mut TestContext<'_>) -> TestResult + 'static) -> Self {
        self.teardown = Some(Rc::new(step));
        self
    }

    #[must_use]
    #[track_caller]
    pub fn test(
        self,
        name: impl Into<String>,
        body: impl Fn(&mut TestContext<'_>) -> TestResult + 'static,
    ) -> Self {
        self.register(name.into(), Rc::new(body), false, Location::caller())
    }

    /// Register a disabled test.
    #[must_use]
    #[track_caller]
    pub fn ignore(
        self,
        name: impl Into<String>,
        body: impl Fn(&mut TestContext<'_>) -> TestResult + 'static,
    ) -> Self {
        self.register(name.into(), Rc::new(body), true, Location::caller())
    }

    fn register(
        mut self,
        name: String,
        body: Step,
        ignored: bool,
        location: &'static Location<'static>,
    ) -> Self {
        self.fixtures.push(Fixture {
            group: self.name.clone(),
            name,
            file: location.file(),
            line: location.line(),
            ignored,
            setup: self.setup.clone(),
            body,
            teardown: self.teardown.clone(),
        });
        self
    }
}

/// Every registered test, in run order.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    fixtures: Vec<Fixture>,
}

impl Suite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn group(mut self, group: TestGroup) -> Self {
        self.add_group(group);
        self
    }

    pub fn add_group(&mut self, group: TestGroup) {
        self.fixtures.extend(group.fixtures);
    }

    #[must_use]
    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_keeps_order_and_location() {
        let suite = Suite::new()
            .group(TestGroup::new("G1").test("A", |_| Ok(())))
            .group(TestGroup::new("G2").test("B", |_| Ok(())).ignore("C", |_| Ok(())));
        let names: Vec<String> = suite.fixtures().iter().map(Fixture::display_name).collect();
        assert_eq!(names, ["TEST(G1, A)", "TEST(G2, B)", "TEST(G2, C)"]);
        assert!(suite.fixtures()[0].file().ends_with("fixture.rs"));
        assert!(suite.fixtures()[0].line() > 0);
        assert!(suite.fixtures()[2].is_ignored());
        assert!(!suite.fixtures()[1].is_ignored());
    }

    #[test]
    fn group_hooks_attach_to_later_tests() {
        let group = TestGroup::new("g")
            .test("before_hooks", |_| Ok(()))
            .setup(|_| Ok(()))
            .teardown(|_| Ok(()))
            .test("after_hooks", |_| Ok(()));
        let suite = Suite::new().group(group);
        assert!(suite.fixtures()[0].setup.is_none());
        assert!(suite.fixtures()[1].setup.is_some());
        assert!(suite.fixtures()[1].teardown.is_some());
    }
}
