//! L1 permission cache tuning. Defaults mirror values known to work in
//! production: tiered grant TTLs, a short denial TTL, and jitter tuned to
//! avoid thundering herds on expiry.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationMode {
    /// O(1) invalidation via secondary indexes (default).
    Targeted,
    /// O(n) full-scan invalidation, kept for small caches or debugging.
    ZoneWide,
}

#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    pub max_size: usize,
    pub ttl_seconds: u64,
    pub denial_ttl_seconds: u64,
    pub enable_adaptive_ttl: bool,
    pub ttl_jitter_percent: f64,
    pub refresh_ahead_factor: f64,
    pub xfetch_beta: f64,
    pub tiered_ttl_seconds: HashMap<String, u64>,
    pub invalidation_mode: InvalidationMode,
    pub stampede_timeout: Duration,
    pub write_frequency_window: Duration,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        let tiered: HashMap<String, u64> = [
            ("owner", 3600),
            ("direct_owner", 3600),
            ("admin", 3600),
            ("editor", 600),
            ("write", 600),
            ("contributor", 600),
            ("can_write", 600),
            ("viewer", 600),
            ("read", 600),
            ("can_read", 600),
            ("reader", 600),
            ("inherited", 300),
            ("denial", 60),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            max_size: 50_000,
            ttl_seconds: 300,
            denial_ttl_seconds: 60,
            enable_adaptive_ttl: false,
            ttl_jitter_percent: 0.2,
            refresh_ahead_factor: 0.7,
            xfetch_beta: 1.0,
            tiered_ttl_seconds: tiered,
            invalidation_mode: InvalidationMode::Targeted,
            stampede_timeout: Duration::from_secs(5),
            write_frequency_window: Duration::from_secs(300),
        }
    }
}

impl PermissionCacheConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("NEXUS_CACHE_MAX_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.max_size = n;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                cfg.ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_DENIAL_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                cfg.denial_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_ENABLE_ADAPTIVE_TTL") {
            cfg.enable_adaptive_ttl = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_JITTER_PERCENT") {
            if let Ok(n) = v.parse() {
                cfg.ttl_jitter_percent = n;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_XFETCH_BETA") {
            if let Ok(n) = v.parse() {
                cfg.xfetch_beta = n;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_CACHE_INVALIDATION_MODE") {
            cfg.invalidation_mode = match v.as_str() {
                "zone_wide" => InvalidationMode::ZoneWide,
                _ => InvalidationMode::Targeted,
            };
        }

        cfg
    }

    /// Looks up the TTL tier for `relation`, falling back to the flat
    /// `ttl_seconds` for relations outside the known tiers. `is_denial`
    /// always wins and uses the `denial` tier regardless of relation.
    pub(crate) fn ttl_for(&self, relation: Option<&str>, is_denial: bool) -> u64 {
        if is_denial {
            return *self
                .tiered_ttl_seconds
                .get("denial")
                .unwrap_or(&self.denial_ttl_seconds);
        }
        match relation {
            Some(r) => *self
                .tiered_ttl_seconds
                .get(&r.to_lowercase())
                .unwrap_or(&self.ttl_seconds),
            None => self.ttl_seconds,
        }
    }
}
