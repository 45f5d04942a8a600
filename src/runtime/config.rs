//! Event-loop configuration.

use core::fmt;
use std::rc::Rc;

use crate::observability::LogLevel;

/// How deferred-value handler dispatch is scheduled.
///
/// Every handler invocation is deferred through one of these policies so a
/// handler never observes partial settlement of its source: the current
/// synchronous region always runs to completion first.
#[derive(Clone)]
pub enum DispatchPolicy {
    /// Enqueue on the microtask queue (drained before anything else).
    Microtask,
    /// Enqueue on the macrotask queue (one per loop quantum).
    Macrotask,
    /// Hand the step to a caller-supplied scheduler function.
    Custom(Rc<dyn Fn(Box<dyn FnOnce()>)>),
}

impl fmt::Debug for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microtask => f.write_str("Microtask"),
            Self::Macrotask => f.write_str("Macrotask"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What a double-settle attempt from user-facing completers does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Log a warning and ignore the attempt.
    Warn,
    /// Panic. Useful in tests to surface settlement bugs immediately.
    Strict,
}

/// Configuration for an [`EventLoop`](super::EventLoop).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Handler dispatch policy. Default: [`DispatchPolicy::Microtask`].
    pub dispatch: DispatchPolicy,
    /// Double-settle policy. Default: [`SettlePolicy::Warn`].
    pub settle: SettlePolicy,
    /// Maximum progress values buffered per pending deferred value for
    /// replay to late subscribers. Oldest values are dropped past the cap.
    /// Default: 1024.
    pub progress_buffer: usize,
    /// Maximum log entries retained by the loop's collector. Default: 1024.
    pub log_capacity: usize,
    /// Minimum level retained by the loop's collector. Default: `Debug`.
    pub log_level: LogLevel,
}

impl RuntimeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatch: DispatchPolicy::Microtask,
            settle: SettlePolicy::Warn,
            progress_buffer: 1024,
            log_capacity: 1024,
            log_level: LogLevel::Debug,
        }
    }

    /// Sets the dispatch policy.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the double-settle policy.
    #[must_use]
    pub fn with_settle(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    /// Sets the progress replay buffer cap.
    #[must_use]
    pub fn with_progress_buffer(mut self, cap: usize) -> Self {
        self.progress_buffer = cap;
        self
    }

    /// Sets the log collector capacity.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Sets the minimum retained log level.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(matches!(config.dispatch, DispatchPolicy::Microtask));
        assert_eq!(config.settle, SettlePolicy::Warn);
        assert_eq!(config.progress_buffer, 1024);
    }

    #[test]
    fn builders_override() {
        let config = RuntimeConfig::new()
            .with_dispatch(DispatchPolicy::Macrotask)
            .with_settle(SettlePolicy::Strict)
            .with_progress_buffer(4)
            .with_log_capacity(16)
            .with_log_level(LogLevel::Warn);
        assert!(matches!(config.dispatch, DispatchPolicy::Macrotask));
        assert_eq!(config.settle, SettlePolicy::Strict);
        assert_eq!(config.progress_buffer, 4);
        assert_eq!(config.log_capacity, 16);
        assert_eq!(config.log_level, LogLevel::Warn);
    }
}
