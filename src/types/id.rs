//! Identifier types.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for a job in the scheduler.
///
/// Job ids are minted monotonically by the scheduler and display as
/// `job-N`. The id is opaque: nothing beyond equality and ordering should
/// be read into it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct JobId(u64);

impl JobId {
    /// Creates a job id from its sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the underlying sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
