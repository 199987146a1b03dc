//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifier of a job, assigned by the store at enqueue time.
///
/// Ids are drawn from a monotonically increasing sequence, so ordering two ids
/// orders the jobs by submission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// The first id handed out by an empty store.
    pub const FIRST: JobId = JobId(1);

    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Get the underlying sequence number.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The id following this one in the sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for JobId {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

impl From<JobId> for u64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
