//! Observable state of a deferred value.

use core::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};

use crate::error::{Fault, Result};

/// The three-state lifecycle of a deferred value.
///
/// A value transitions out of `Pending` exactly once, and never between
/// `Fulfilled` and `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DvState {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with a fault.
    Rejected,
}

impl DvState {
    /// Returns true if the value is no longer pending.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Fulfilled => f.write_str("fulfilled"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// A settled outcome: the value or the fault.
///
/// This is what settle hooks receive and what
/// [`all_settled`](crate::DeferredValue::all_settled) collects per input.
#[derive(Debug, Clone)]
pub enum Settled<T> {
    /// The value fulfilled.
    Fulfilled(T),
    /// The value rejected.
    Rejected(Fault),
}

impl<T> Settled<T> {
    /// Returns the corresponding state.
    #[must_use]
    pub const fn state(&self) -> DvState {
        match self {
            Self::Fulfilled(_) => DvState::Fulfilled,
            Self::Rejected(_) => DvState::Rejected,
        }
    }

    /// Returns true if this outcome is a fulfillment.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// Returns true if this outcome is a rejection.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns the fulfillment value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(v) => Some(v),
            Self::Rejected(_) => None,
        }
    }

    /// Returns the rejection fault, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<&Fault> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(f) => Some(f),
        }
    }

    /// Converts to a standard `Result`.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Fulfilled(v) => Ok(v),
            Self::Rejected(f) => Err(f),
        }
    }
}

/// Creation-site and rejection-site capture for diagnostics.
///
/// Every deferred value records where it was constructed; once rejected it
/// also records where the rejecting fault was constructed.
#[derive(Debug, Clone, Copy)]
pub struct SettleTrace {
    created_at: &'static Location<'static>,
    rejected_at: Option<&'static Location<'static>>,
}

impl SettleTrace {
    pub(crate) const fn new(
        created_at: &'static Location<'static>,
        rejected_at: Option<&'static Location<'static>>,
    ) -> Self {
        Self {
            created_at,
            rejected_at,
        }
    }

    /// The site the deferred value was constructed at.
    #[must_use]
    pub const fn created_at(&self) -> &'static Location<'static> {
        self.created_at
    }

    /// The site the rejecting fault was constructed at, once rejected.
    #[must_use]
    pub const fn rejected_at(&self) -> Option<&'static Location<'static>> {
        self.rejected_at
    }
}

impl fmt::Display for SettleTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "created at {}", self.created_at)?;
        if let Some(at) = self.rejected_at {
            write!(f, "; rejected at {at}")?;
        }
        Ok(())
    }
}
