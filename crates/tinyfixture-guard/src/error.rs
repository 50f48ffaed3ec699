//! Errors reported by the guarded heap.

use std::panic::Location;
use std::thread::ThreadId;

use thiserror::Error;

use crate::audit::LeakReport;

/// Operation during which a damaged block was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseSite {
    Release,
    Resize,
}

impl std::fmt::Display for ReleaseSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Release => "release()",
            Self::Resize => "resize()",
        })
    }
}

/// Everything the guarded heap can refuse or detect.
///
/// Refusals (`ZeroSize`, `InjectedFailure`, `OutOfMemory`, `SizeOverflow`)
/// are ordinary allocation failures a test may expect. Violations are bugs in
/// the code under test; `ForeignThread` is fatal to the whole run.
#[derive(Debug, Clone, Error)]
pub enum HeapError {
    #[error("zero-sized allocation refused")]
    ZeroSize,
    #[error("allocation failed by injected countdown")]
    InjectedFailure,
    #[error("provider `{provider}` could not supply {requested} bytes")]
    OutOfMemory {
        provider: &'static str,
        requested: usize,
    },
    #[error("allocation size overflows usize")]
    SizeOverflow,
    #[error("Buffer overrun detected during {during} of {size}-byte block allocated at {origin}")]
    Overrun {
        during: ReleaseSite,
        addr: usize,
        size: usize,
        origin: &'static Location<'static>,
    },
    #[error("Header damage detected during {during} of {size}-byte block allocated at {origin}")]
    Underrun {
        during: ReleaseSite,
        addr: usize,
        size: usize,
        origin: &'static Location<'static>,
    },
    #[error("double release of {addr:#x}")]
    DoubleRelease { addr: usize },
    #[error("release of {addr:#x}, which the guarded heap never handed out")]
    ForeignPointer { addr: usize },
    #[error("allocation traffic from thread {caller:?} while the epoch belongs to {owner:?}")]
    ForeignThread { owner: ThreadId, caller: ThreadId },
    #[error("{0}")]
    Leak(LeakReport),
}

impl HeapError {
    /// Memory misuse by the code under test.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::Overrun { .. }
                | Self::Underrun { .. }
                | Self::DoubleRelease { .. }
                | Self::ForeignPointer { .. }
                | Self::ForeignThread { .. }
        )
    }

    /// Errors that must stop the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ForeignThread { .. })
    }

    /// Plain allocation failures.
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::ZeroSize | Self::InjectedFailure | Self::OutOfMemory { .. } | Self::SizeOverflow
        )
    }
}
