//! Log severity levels.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a log entry, ordered from most to least verbose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    /// Fine-grained tracing of internal steps.
    Trace,
    /// Diagnostic information useful during development.
    Debug,
    /// Normal operational events.
    Info,
    /// Something unexpected that the library recovered from.
    Warn,
    /// A failure the library could not recover from on its own.
    Error,
}

impl LogLevel {
    /// Short uppercase name for rendering.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
