//! Composition-root configuration. Each sub-config keeps its own
//! `from_env()` convention, carried from `nexus-cache`/`nexus-graph`/
//! `nexus-storage`; this just aggregates them plus the handful of settings
//! that belong to the engine itself (revision window, whether L2 is
//! enabled at all).

use nexus_cache::{DistributedCacheConfig, PermissionCacheConfig};
use nexus_concurrency::CircuitBreakerConfig;
use nexus_graph::GraphConfig;
use nexus_revision::DEFAULT_REVISION_WINDOW;
use nexus_storage::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub cache: PermissionCacheConfig,
    pub graph: GraphConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// `NEXUS_REDIS_ENABLED` (default `true`) — L2 is an optional
    /// accelerator; a deployment without Redis still functions correctly
    /// against L1 + the graph evaluator, just with more relational-store
    /// traffic.
    pub redis_enabled: bool,
    pub redis: DistributedCacheConfig,
    pub revision_window: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cache: PermissionCacheConfig::default(),
            graph: GraphConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            redis_enabled: true,
            redis: DistributedCacheConfig::default(),
            revision_window: DEFAULT_REVISION_WINDOW,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let redis_enabled = std::env::var("NEXUS_REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let revision_window = std::env::var("NEXUS_REVISION_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REVISION_WINDOW);

        Self {
            database: DatabaseConfig::from_env(),
            cache: PermissionCacheConfig::from_env(),
            graph: GraphConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::default(),
            redis_enabled,
            redis: DistributedCacheConfig::from_env(),
            revision_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_l2_and_uses_revision_default_window() {
        let config = EngineConfig::default();
        assert!(config.redis_enabled);
        assert_eq!(config.revision_window, DEFAULT_REVISION_WINDOW);
    }
}
