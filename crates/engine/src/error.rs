//! Error taxonomy at the API boundary. `CYCLE_DETECTED_INTERNAL` and
//! `DEPTH_LIMIT_EXCEEDED` never reach here as errors — `nexus-graph`
//! already translates both into a `false` result with a warning log: a
//! cycle or a depth overrun is a deny, not a failure. Only conditions that
//! prevent an answer from being computed at all surface as `EngineError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] nexus_storage::StorageError),
    #[error(transparent)]
    Graph(#[from] nexus_graph::GraphError),
    #[error(transparent)]
    Cache(#[from] nexus_cache::CacheError),
    #[error(transparent)]
    Tiger(#[from] nexus_tiger::TigerError),
    #[error(transparent)]
    Invalidation(#[from] nexus_invalidation::InvalidationError),
    #[error("circuit breaker open, relational store unavailable")]
    CircuitOpen,
    #[error("operation cancelled")]
    Cancelled,
    #[error("namespace not registered for object type: {0}")]
    NamespaceNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<nexus_concurrency::Cancelled> for EngineError {
    fn from(_: nexus_concurrency::Cancelled) -> Self {
        EngineError::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_maps_to_cancelled_variant() {
        let err: EngineError = nexus_concurrency::Cancelled.into();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn namespace_not_found_carries_the_object_type() {
        let err = EngineError::NamespaceNotFound("widget".to_string());
        assert_eq!(err.to_string(), "namespace not registered for object type: widget");
    }
}
