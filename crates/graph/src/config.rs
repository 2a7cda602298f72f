use std::time::Duration;

/// Graph Evaluator tuning. Both limits are non-negotiable safety backstops,
/// not performance knobs: authorization must never fan out unboundedly or
/// loop.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub max_depth: usize,
    /// Soft ceiling on the number of distinct objects `expand` will
    /// traverse before giving up and returning a partial result — the same
    /// "must never fan out unboundedly" principle applied to `expand`
    /// rather than `check`.
    pub max_expand_fanout: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_expand_fanout: 10_000,
        }
    }
}

impl GraphConfig {
    pub fn from_env() -> Self {
        Self {
            max_depth: std::env::var("NEXUS_GRAPH_MAX_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            max_expand_fanout: std::env::var("NEXUS_GRAPH_MAX_EXPAND_FANOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
        }
    }
}

/// Default per-call budget for cancellable traversals when a caller doesn't
/// supply its own `CancellationToken` deadline.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
