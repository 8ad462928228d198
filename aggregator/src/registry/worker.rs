use std::{
    fmt::{self, Display},
    num::NonZeroU64,
    sync::Arc,
};

use comms::ModelState;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// How many characters of a worker id are shown in logs and messages.
const SHORT_ID_LEN: usize = 10;

/// The stable, already authenticated identity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a prefix of the id, ids are usually derived from long public keys.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_ID_LEN) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The latest update accepted from a worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub timestamp: Timestamp,
    pub sample_count: NonZeroU64,
    pub state: Arc<ModelState>,
}

/// A worker's update taking part in an aggregation round.
///
/// The state is shared with the registry record it was taken from, a newer submission from the
/// same worker replaces the record but never changes a contribution already captured.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub worker_id: WorkerId,
    pub sample_count: NonZeroU64,
    pub state: Arc<ModelState>,
}
