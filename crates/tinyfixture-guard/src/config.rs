//! Leak diagnostic depth.
//!
//! The depth is read from the `TINYFIXTURE_TRACK` environment variable:
//! - `off`: leaks are reported as a count only.
//! - `origin` (default): each leaked block is itemized with its size and the
//!   `file:line` that allocated it.
//! - `backtrace`: as `origin`, plus the stack captured at allocation time.
//!   Capturing a stack on every allocation is slow; use it to chase a leak.

/// Environment variable selecting the [`TrackingLevel`].
pub const TRACKING_ENV: &str = "TINYFIXTURE_TRACK";

/// How much per-block detail the heap keeps for leak reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingLevel {
    /// Count only.
    Off,
    /// Size and allocation site.
    #[default]
    Origin,
    /// Size, allocation site and captured backtrace.
    Backtrace,
}

impl TrackingLevel {
    /// Parse from string (case-insensitive). Unknown values select the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" | "count" => Self::Off,
            "backtrace" | "stack" | "full" | "2" => Self::Backtrace,
            _ => Self::Origin,
        }
    }

    /// Read [`TRACKING_ENV`], falling back to the default when unset.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(TRACKING_ENV)
            .map(|v| Self::from_str_loose(&v))
            .unwrap_or_default()
    }

    /// Whether leak reports list individual blocks.
    #[must_use]
    pub const fn itemizes(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether a backtrace is captured on every allocation.
    #[must_use]
    pub const fn captures_backtrace(self) -> bool {
        matches!(self, Self::Backtrace)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Origin => "origin",
            Self::Backtrace => "backtrace",
        }
    }
}
