//! Run configuration: invocation flags and environment.
//!
//! Flags are scanned left to right, in any order:
//! - `-v` verbose, `-s` silent
//! - `-g <substr>` / `-n <substr>` group and name filters
//! - `-r [count]` repeat the suite; bare `-r` means twice
//!
//! Anything else is ignored, so a test binary can share its argument list
//! with other tooling.
//!
//! Environment:
//! - `TINYFIXTURE_LOG=<path>` writes a JSONL run log
//! - `TINYFIXTURE_TRACK=off|origin|backtrace` sets leak diagnostic depth

use std::path::PathBuf;

use tinyfixture_guard::TrackingLevel;

use crate::error::FixtureError;

/// Environment variable naming the JSONL run log.
pub const LOG_ENV: &str = "TINYFIXTURE_LOG";

/// Repeat count used by a bare `-r`.
pub const DEFAULT_REPEAT_FLAG: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub verbose: bool,
    pub silent: bool,
    pub group_filter: Option<String>,
    pub name_filter: Option<String>,
    pub repeat: u32,
    pub log_path: Option<PathBuf>,
    pub tracking: TrackingLevel,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            silent: false,
            group_filter: None,
            name_filter: None,
            repeat: 1,
            log_path: None,
            tracking: TrackingLevel::default(),
        }
    }
}

impl RunConfig {
    /// Scan invocation flags (program name excluded).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `-g`/`-n` has no value or a repeat count does
    /// not fit in `u32`.
    pub fn from_args<I, S>(args: I) -> Result<Self, FixtureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let mut config = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_ref() {
                "-v" => config.verbose = true,
                "-s" => config.silent = true,
                flag @ ("-g" | "-n") => {
                    i += 1;
                    let value = args
                        .get(i)
                        .map(|v| v.as_ref().to_string())
                        .ok_or_else(|| FixtureError::InvalidArgument(format!("{flag} needs a value")))?;
                    if flag == "-g" {
                        config.group_filter = Some(value);
                    } else {
                        config.name_filter = Some(value);
                    }
                }
                "-r" => {
                    config.repeat = DEFAULT_REPEAT_FLAG;
                    if let Some(count) = args.get(i + 1).and_then(|next| leading_digits(next.as_ref())) {
                        config.repeat = count.parse().map_err(|_| {
                            FixtureError::InvalidArgument(format!("repeat count {count} is too large"))
                        })?;
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Ok(config)
    }

    /// Apply [`LOG_ENV`] and the tracking variable on top of `self`.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Some(path) = std::env::var_os(LOG_ENV).filter(|p| !p.is_empty()) {
            self.log_path = Some(PathBuf::from(path));
        }
        self.tracking = TrackingLevel::from_env();
        self
    }

    /// Whether a test passes both substring filters.
    #[must_use]
    pub fn selects(&self, group: &str, name: &str) -> bool {
        let matches = |filter: &Option<String>, value: &str| {
            filter.as_deref().is_none_or(|f| value.contains(f))
        };
        matches(&self.name_filter, name) && matches(&self.group_filter, group)
    }

    /// Per-test progress output is printed.
    #[must_use]
    pub fn shows_progress(&self) -> bool {
        self.verbose || !self.silent
    }
}

/// The run of ASCII digits at the start of `token`, if it starts with one.
fn leading_digits(token: &str) -> Option<&str> {
    let end = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(token.len(), |(idx, _)| idx);
    (end > 0).then(|| &token[..end])
}
