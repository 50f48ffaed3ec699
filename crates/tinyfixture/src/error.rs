//! Errors that stop a run, as opposed to failures scoped to one test.

use thiserror::Error;

use crate::failure::Failure;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run log serialization error: {0}")]
    Log(#[from] serde_json::Error),
    #[error("fatal: {0}")]
    Fatal(Failure),
}

impl FixtureError {
    /// Process exit status for a run that stopped on this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}
