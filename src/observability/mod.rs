//! Structured logging for the event loop and its subsystems.
//!
//! The core never writes to stdout/stderr. Everything the library wants to
//! surface (swallowed hook panics, double-settle attempts, unhandled
//! rejections, dropped progress values) is recorded as a structured
//! [`LogEntry`] in the loop's bounded [`LogCollector`], where embedders and
//! tests can drain and inspect it.
//!
//! Entries are determinism-compatible: no wall-clock timestamps, no
//! allocation-order artifacts, just level + message + key/value fields.

pub mod collector;
pub mod entry;
pub mod level;

pub use collector::LogCollector;
pub use entry::LogEntry;
pub use level::LogLevel;
