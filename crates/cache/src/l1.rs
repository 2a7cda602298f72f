//! In-process permission cache. Split grant/denial maps with tiered TTLs,
//! secondary indexes for targeted invalidation, XFetch probabilistic early
//! refresh, adaptive TTL under write pressure, and singleflight stampede
//! prevention on the miss path.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use nexus_concurrency::SingleFlightGroup;

use crate::config::{InvalidationMode, PermissionCacheConfig};
use crate::key::{ancestor_prefixes, CacheKey};

#[derive(Debug, Clone)]
struct Entry {
    created_at: Instant,
    jittered_ttl: Duration,
    /// How long the value took to compute; feeds the XFetch formula.
    delta: Duration,
    /// The zone revision in effect when this entry was written, used by
    /// `get_with_revision_check` to reject stale hits under
    /// `at_least_as_fresh` consistency.
    revision: i64,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.created_at.elapsed() < self.jittered_ttl
    }
}

type IndexKey = (String, String, String);

#[derive(Default)]
struct Inner {
    grant: HashMap<CacheKey, Entry>,
    denial: HashMap<CacheKey, Entry>,
    subject_index: HashMap<IndexKey, HashSet<CacheKey>>,
    object_index: HashMap<IndexKey, HashSet<CacheKey>>,
    path_prefix_index: HashMap<IndexKey, HashSet<CacheKey>>,
    write_frequency: HashMap<String, (u32, Instant)>,
}

impl Inner {
    fn add_to_indexes(&mut self, key: &CacheKey, mode: InvalidationMode) {
        if mode != InvalidationMode::Targeted {
            return;
        }
        self.subject_index
            .entry(key.subject_key())
            .or_default()
            .insert(key.clone());
        self.object_index
            .entry(key.object_key())
            .or_default()
            .insert(key.clone());
        if key.is_path_indexable() {
            for prefix in ancestor_prefixes(&key.object_id) {
                self.path_prefix_index
                    .entry((key.zone_id.clone(), key.object_type.clone(), prefix))
                    .or_default()
                    .insert(key.clone());
            }
        }
    }

    fn remove_from_indexes(&mut self, key: &CacheKey) {
        if let Some(set) = self.subject_index.get_mut(&key.subject_key()) {
            set.remove(key);
            if set.is_empty() {
                self.subject_index.remove(&key.subject_key());
            }
        }
        if let Some(set) = self.object_index.get_mut(&key.object_key()) {
            set.remove(key);
            if set.is_empty() {
                self.object_index.remove(&key.object_key());
            }
        }
        if key.is_path_indexable() {
            for prefix in ancestor_prefixes(&key.object_id) {
                let idx_key = (key.zone_id.clone(), key.object_type.clone(), prefix);
                if let Some(set) = self.path_prefix_index.get_mut(&idx_key) {
                    set.remove(key);
                    if set.is_empty() {
                        self.path_prefix_index.remove(&idx_key);
                    }
                }
            }
        }
    }

    fn remove_key(&mut self, key: &CacheKey) -> bool {
        let removed = self.grant.remove(key).is_some() | self.denial.remove(key).is_some();
        if removed {
            self.remove_from_indexes(key);
        }
        removed
    }

    fn evict_oldest_tenth(&mut self) {
        let mut all: Vec<(CacheKey, Instant)> = self
            .grant
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at))
            .chain(self.denial.iter().map(|(k, e)| (k.clone(), e.created_at)))
            .collect();
        if all.is_empty() {
            return;
        }
        all.sort_by_key(|(_, created_at)| *created_at);
        let evict_count = (all.len() / 10).max(1);
        for (key, _) in all.into_iter().take(evict_count) {
            self.remove_key(&key);
        }
    }
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    grant_hits: AtomicU64,
    denial_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    targeted_invalidations: AtomicU64,
    xfetch_early_refreshes: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub max_size: usize,
    pub current_size: usize,
    pub grant_cache_size: usize,
    pub denial_cache_size: usize,
    pub hits: u64,
    pub grant_hits: u64,
    pub denial_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub targeted_invalidations: u64,
    pub xfetch_early_refreshes: u64,
}

/// The L1 permission cache. Cheap to clone (internally `Arc`-free; share via
/// `Arc<PermissionCache>` across callers the way the other engine components
/// are shared).
pub struct PermissionCache {
    inner: Mutex<Inner>,
    config: PermissionCacheConfig,
    stats: Stats,
    singleflight: SingleFlightGroup<CacheKey, bool, String>,
}

impl PermissionCache {
    pub fn new(config: PermissionCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            stats: Stats::default(),
            singleflight: SingleFlightGroup::new(),
        }
    }

    /// Grant-cache-first, then denial-cache lookup. Expired entries are
    /// treated as misses and lazily evicted.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.grant.get(key) {
            if entry.is_live() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.grant_hits.fetch_add(1, Ordering::Relaxed);
                return Some(true);
            }
            let key = key.clone();
            inner.remove_key(&key);
        }
        if let Some(entry) = inner.denial.get(key) {
            if entry.is_live() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.denial_hits.fetch_add(1, Ordering::Relaxed);
                return Some(false);
            }
            let key = key.clone();
            inner.remove_key(&key);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// `at_least_as_fresh` lookup: an entry cached before `min_revision`
    /// can't attest freshness at `min_revision`, so it's treated as a miss
    /// even though it hasn't expired.
    pub fn get_with_revision_check(&self, key: &CacheKey, min_revision: i64) -> Option<bool> {
        let inner = self.inner.lock();
        if let Some(entry) = inner.grant.get(key) {
            if entry.is_live() && entry.revision >= min_revision {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.grant_hits.fetch_add(1, Ordering::Relaxed);
                return Some(true);
            }
        }
        if let Some(entry) = inner.denial.get(key) {
            if entry.is_live() && entry.revision >= min_revision {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.denial_hits.fetch_add(1, Ordering::Relaxed);
                return Some(false);
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// `relation` selects the TTL tier for grants (see
    /// `PermissionCacheConfig::ttl_for`); `is_inherited` overrides the tier
    /// to `"inherited"` regardless of `relation`. Denials always use the
    /// `denial` tier. `delta` is the compute latency fed to XFetch on the
    /// next read.
    pub fn set(
        &self,
        key: &CacheKey,
        result: bool,
        delta: Duration,
        relation: Option<&str>,
        is_inherited: bool,
        revision: i64,
    ) {
        let effective_relation = if is_inherited {
            Some("inherited")
        } else {
            relation
        };

        let base_ttl = if !result {
            self.config.ttl_for(None, true)
        } else if self.config.enable_adaptive_ttl && effective_relation.is_none() {
            self.adaptive_ttl(&key.object_id)
        } else {
            self.config.ttl_for(effective_relation, false)
        };

        let jittered_ttl = Duration::from_secs_f64(self.jitter(base_ttl as f64));
        let entry = Entry {
            created_at: Instant::now(),
            jittered_ttl,
            delta,
            revision,
        };

        let mut inner = self.inner.lock();
        if result {
            inner.grant.insert(key.clone(), entry);
            inner.denial.remove(key);
        } else {
            inner.denial.insert(key.clone(), entry);
            inner.grant.remove(key);
        }
        inner.add_to_indexes(key, self.config.invalidation_mode);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if inner.grant.len() + inner.denial.len() > self.config.max_size {
            inner.evict_oldest_tenth();
        }
    }

    fn jitter(&self, base_seconds: f64) -> f64 {
        if self.config.ttl_jitter_percent <= 0.0 {
            return base_seconds;
        }
        let spread = base_seconds * self.config.ttl_jitter_percent;
        let mut rng = rand::thread_rng();
        (base_seconds + rng.gen_range(-spread..=spread)).max(0.001)
    }

    /// XFetch (VLDB 2015): probabilistically triggers a recompute before
    /// expiry, spreading refreshes out instead of the whole herd expiring
    /// at once. Falls back to a flat `refresh_ahead_factor * ttl` threshold
    /// when the last compute was cheap enough that `delta` is noise.
    pub fn should_refresh_xfetch(&self, key: &CacheKey) -> bool {
        let inner = self.inner.lock();
        let entry = match inner.grant.get(key).or_else(|| inner.denial.get(key)) {
            Some(e) => e,
            None => return false,
        };
        let age = entry.created_at.elapsed();
        if age >= entry.jittered_ttl {
            return true;
        }
        let delta_secs = entry.delta.as_secs_f64();
        let needs_refresh = if delta_secs < 0.001 {
            age.as_secs_f64() > entry.jittered_ttl.as_secs_f64() * self.config.refresh_ahead_factor
        } else {
            let r: f64 = rand::thread_rng().gen();
            let now = age.as_secs_f64();
            let ttl = entry.jittered_ttl.as_secs_f64();
            now - delta_secs * self.config.xfetch_beta * r.ln() >= ttl
        };
        if needs_refresh {
            self.stats
                .xfetch_early_refreshes
                .fetch_add(1, Ordering::Relaxed);
        }
        needs_refresh
    }

    /// Fetches the cached value if present and live; otherwise computes it
    /// exactly once across concurrent callers sharing `key` (singleflight),
    /// caches the fresh result, and returns it to every waiter.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: CacheKey,
        relation: Option<&str>,
        is_inherited: bool,
        revision: i64,
        compute: F,
    ) -> std::result::Result<bool, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<bool, E>>,
        E: std::fmt::Display,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let started = Instant::now();
        let relation_owned = relation.map(|s| s.to_string());
        let key_for_set = key.clone();
        self.singleflight
            .execute(key, move || async move {
                let result = compute().await.map_err(|e| e.to_string())?;
                self.set(
                    &key_for_set,
                    result,
                    started.elapsed(),
                    relation_owned.as_deref(),
                    is_inherited,
                    revision,
                );
                Ok(result)
            })
            .await
    }

    pub fn invalidate_subject(&self, zone_id: &str, subject_type: &str, subject_id: &str) -> u64 {
        let idx_key = (
            zone_id.to_string(),
            subject_type.to_string(),
            subject_id.to_string(),
        );
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = match self.config.invalidation_mode {
            InvalidationMode::Targeted => inner
                .subject_index
                .get(&idx_key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
            InvalidationMode::ZoneWide => inner
                .grant
                .keys()
                .chain(inner.denial.keys())
                .filter(|k| {
                    k.zone_id == zone_id && k.subject_type == subject_type && k.subject_id == subject_id
                })
                .cloned()
                .collect(),
        };
        self.remove_all(&mut inner, &keys)
    }

    pub fn invalidate_object(&self, zone_id: &str, object_type: &str, object_id: &str) -> u64 {
        let idx_key = (
            zone_id.to_string(),
            object_type.to_string(),
            object_id.to_string(),
        );
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = match self.config.invalidation_mode {
            InvalidationMode::Targeted => inner
                .object_index
                .get(&idx_key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
            InvalidationMode::ZoneWide => inner
                .grant
                .keys()
                .chain(inner.denial.keys())
                .filter(|k| {
                    k.zone_id == zone_id && k.object_type == object_type && k.object_id == object_id
                })
                .cloned()
                .collect(),
        };
        self.remove_all(&mut inner, &keys)
    }

    /// Intersection of the subject and object indexes gives exactly the
    /// pair's keys in targeted mode.
    #[allow(clippy::too_many_arguments)]
    pub fn invalidate_subject_object_pair(
        &self,
        zone_id: &str,
        subject_type: &str,
        subject_id: &str,
        object_type: &str,
        object_id: &str,
    ) -> u64 {
        let subject_idx = (
            zone_id.to_string(),
            subject_type.to_string(),
            subject_id.to_string(),
        );
        let object_idx = (
            zone_id.to_string(),
            object_type.to_string(),
            object_id.to_string(),
        );
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = match self.config.invalidation_mode {
            InvalidationMode::Targeted => {
                let subject_keys = inner.subject_index.get(&subject_idx);
                let object_keys = inner.object_index.get(&object_idx);
                match (subject_keys, object_keys) {
                    (Some(s), Some(o)) => s.intersection(o).cloned().collect(),
                    _ => Vec::new(),
                }
            }
            InvalidationMode::ZoneWide => inner
                .grant
                .keys()
                .chain(inner.denial.keys())
                .filter(|k| {
                    k.zone_id == zone_id
                        && k.subject_type == subject_type
                        && k.subject_id == subject_id
                        && k.object_type == object_type
                        && k.object_id == object_id
                })
                .cloned()
                .collect(),
        };
        self.remove_all(&mut inner, &keys)
    }

    pub fn invalidate_object_prefix(
        &self,
        zone_id: &str,
        object_type: &str,
        object_id_prefix: &str,
    ) -> u64 {
        let idx_key = (
            zone_id.to_string(),
            object_type.to_string(),
            object_id_prefix.trim_end_matches('/').to_string(),
        );
        let idx_key = if idx_key.2.is_empty() {
            (idx_key.0, idx_key.1, "/".to_string())
        } else {
            idx_key
        };
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = match self.config.invalidation_mode {
            InvalidationMode::Targeted => inner
                .path_prefix_index
                .get(&idx_key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
            InvalidationMode::ZoneWide => inner
                .grant
                .keys()
                .chain(inner.denial.keys())
                .filter(|k| {
                    k.zone_id == zone_id
                        && k.object_type == object_type
                        && k.object_id.starts_with(object_id_prefix)
                })
                .cloned()
                .collect(),
        };
        self.remove_all(&mut inner, &keys)
    }

    fn remove_all(&self, inner: &mut Inner, keys: &[CacheKey]) -> u64 {
        let mut count = 0u64;
        for key in keys {
            if inner.remove_key(key) {
                count += 1;
            }
        }
        if matches!(self.config.invalidation_mode, InvalidationMode::Targeted) {
            self.stats
                .targeted_invalidations
                .fetch_add(1, Ordering::Relaxed);
        }
        self.stats.invalidations.fetch_add(count, Ordering::Relaxed);
        count
    }

    pub fn track_write(&self, object_id: &str) {
        if !self.config.enable_adaptive_ttl {
            return;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let window = self.config.write_frequency_window;
        inner
            .write_frequency
            .entry(object_id.to_string())
            .and_modify(|(count, last_reset)| {
                if now.duration_since(*last_reset) > window {
                    *count = 1;
                    *last_reset = now;
                } else {
                    *count += 1;
                }
            })
            .or_insert((1, now));
    }

    fn adaptive_ttl(&self, object_id: &str) -> u64 {
        let inner = self.inner.lock();
        let base = self.config.ttl_seconds;
        let (count, last_reset) = match inner.write_frequency.get(object_id) {
            Some(v) => *v,
            None => return base,
        };
        let window = self.config.write_frequency_window;
        let elapsed = last_reset.elapsed();
        if elapsed > window {
            return base;
        }
        let elapsed_minutes = (elapsed.as_secs_f64() / 60.0).max(1.0 / 60.0);
        let writes_per_minute = count as f64 / elapsed_minutes.max(1.0);

        if writes_per_minute > 10.0 {
            (base / 6).max(10)
        } else if writes_per_minute > 5.0 {
            (base / 3).max(30)
        } else if writes_per_minute > 1.0 {
            (base / 2).max(60)
        } else {
            (base * 2).min(300)
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.grant.clear();
        inner.denial.clear();
        inner.subject_index.clear();
        inner.object_index.clear();
        inner.path_prefix_index.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            max_size: self.config.max_size,
            current_size: inner.grant.len() + inner.denial.len(),
            grant_cache_size: inner.grant.len(),
            denial_cache_size: inner.denial.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            grant_hits: self.stats.grant_hits.load(Ordering::Relaxed),
            denial_hits: self.stats.denial_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            targeted_invalidations: self.stats.targeted_invalidations.load(Ordering::Relaxed),
            xfetch_early_refreshes: self.stats.xfetch_early_refreshes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(subject: &str, object: &str) -> CacheKey {
        CacheKey::new("user", subject, "viewer", "file", object, None, 0)
    }

    #[test]
    fn set_then_get_round_trips_grant() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k = key("alice", "/a.txt");
        cache.set(&k, true, Duration::from_millis(5), Some("viewer"), false, 1);
        assert_eq!(cache.get(&k), Some(true));
    }

    #[test]
    fn denial_entries_use_denial_tier() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k = key("alice", "/a.txt");
        cache.set(&k, false, Duration::from_millis(5), Some("owner"), false, 1);
        assert_eq!(cache.get(&k), Some(false));
    }

    #[test]
    fn revision_check_rejects_stale_hit() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k = key("alice", "/a.txt");
        cache.set(&k, true, Duration::from_millis(5), None, false, 5);
        assert_eq!(cache.get_with_revision_check(&k, 5), Some(true));
        assert_eq!(cache.get_with_revision_check(&k, 6), None);
    }

    #[test]
    fn invalidate_subject_removes_all_their_entries() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k1 = key("alice", "/a.txt");
        let k2 = key("alice", "/b.txt");
        cache.set(&k1, true, Duration::from_millis(1), None, false, 1);
        cache.set(&k2, true, Duration::from_millis(1), None, false, 1);
        let removed = cache.invalidate_subject("default", "user", "alice");
        assert_eq!(removed, 2);
        assert_eq!(cache.get(&k1), None);
        assert_eq!(cache.get(&k2), None);
    }

    #[test]
    fn invalidate_object_prefix_covers_nested_paths() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k = CacheKey::new("user", "alice", "viewer", "file", "/workspace/a/b.txt", None, 0);
        cache.set(&k, true, Duration::from_millis(1), None, false, 1);
        let removed = cache.invalidate_object_prefix("default", "file", "/workspace");
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&k), None);
    }

    #[test]
    fn invalidate_subject_object_pair_does_not_affect_other_pairs() {
        let cache = PermissionCache::new(PermissionCacheConfig::default());
        let k1 = key("alice", "/a.txt");
        let k2 = key("bob", "/a.txt");
        cache.set(&k1, true, Duration::from_millis(1), None, false, 1);
        cache.set(&k2, true, Duration::from_millis(1), None, false, 1);
        let removed = cache.invalidate_subject_object_pair("default", "user", "alice", "file", "/a.txt");
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&k1), None);
        assert_eq!(cache.get(&k2), Some(true));
    }

    #[tokio::test]
    async fn get_or_compute_runs_once_under_concurrency() {
        use std::sync::Arc;
        let cache = Arc::new(PermissionCache::new(PermissionCacheConfig::default()));
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key("alice", "/a.txt"), Some("viewer"), false, 1, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<bool, String>(true)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(true));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adaptive_ttl_shortens_under_high_write_rate() {
        let mut config = PermissionCacheConfig::default();
        config.enable_adaptive_ttl = true;
        let cache = PermissionCache::new(config);
        for _ in 0..20 {
            cache.track_write("/hot.txt");
        }
        assert!(cache.adaptive_ttl("/hot.txt") < cache.config.ttl_seconds);
    }
}
