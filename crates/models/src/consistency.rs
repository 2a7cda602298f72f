//! Per-request consistency modes for permission checks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// L1 may return any non-expired entry. Default.
    #[default]
    MinimizeLatency,
    /// L1 hit rejected unless `revision_at_cache_time >= min_revision`.
    AtLeastAsFresh,
    /// Skip L1 and L2 entirely; go straight to Tiger or the graph.
    FullyConsistent,
}

/// Returned from every write so callers can feed it back into a subsequent
/// `at_least_as_fresh` check for read-your-writes consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyToken {
    pub revision: i64,
}

impl ConsistencyToken {
    pub fn new(revision: i64) -> Self {
        Self { revision }
    }
}
