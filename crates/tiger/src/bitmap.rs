//! Tiger Bitmap Cache: materialized Roaring Bitmaps of accessible resource
//! int-ids per `(subject, permission, resource_type)`, backed by an
//! in-process L1, an optional L2 mirror, and the `nexus-storage` L3 table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use nexus_cache::DistributedCache;
use nexus_models::tuple::SubjectType;
use nexus_models::TigerBitmapRow;
use nexus_storage::{ResourceMapRepository, TigerRepository};

use crate::error::{Result, TigerError};
use crate::key::TigerKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBitmap {
    #[serde(with = "bitmap_bytes")]
    bitmap: RoaringBitmap,
    revision: i64,
}

mod bitmap_bytes {
    use roaring::RoaringBitmap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bitmap: &RoaringBitmap, s: S) -> Result<S::Ok, S::Error> {
        let mut buf = Vec::new();
        bitmap
            .serialize_into(&mut buf)
            .map_err(serde::ser::Error::custom)?;
        s.serialize_bytes(&buf)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<RoaringBitmap, D::Error> {
        let buf: Vec<u8> = Vec::deserialize(d)?;
        RoaringBitmap::deserialize_from(&buf[..]).map_err(serde::de::Error::custom)
    }
}

struct BitmapEntry {
    bitmap: RoaringBitmap,
    revision: i64,
    cached_at: Instant,
}

struct Inner {
    cache: HashMap<TigerKey, BitmapEntry>,
}

pub struct TigerBitmapCache {
    inner: Mutex<Inner>,
    l1_ttl: Duration,
    max_size: usize,
    repo: TigerRepository,
    resource_map: ResourceMapRepository,
    l2: Mutex<Option<Arc<DistributedCache>>>,
}

impl TigerBitmapCache {
    pub fn new(repo: TigerRepository, resource_map: ResourceMapRepository) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: HashMap::new(),
            }),
            l1_ttl: Duration::from_secs(300),
            max_size: 100_000,
            repo,
            resource_map,
            l2: Mutex::new(None),
        }
    }

    /// L2 is bound after construction (it may not be available at startup
    /// if Dragonfly/Redis isn't reachable yet) — matches
    /// `set_dragonfly_cache`'s late-binding in the original.
    pub fn set_distributed_cache(&self, l2: Option<Arc<DistributedCache>>) {
        *self.l2.lock() = l2;
    }

    fn l2_key(key: &TigerKey) -> String {
        format!(
            "tiger:{}:{}:{}:{}",
            key.subject_type, key.subject_id, key.permission, key.resource_type
        )
    }

    fn check_l1(&self, key: &TigerKey, int_id: i32) -> Option<bool> {
        let inner = self.inner.lock();
        let entry = inner.cache.get(key)?;
        if entry.cached_at.elapsed() >= self.l1_ttl {
            return None;
        }
        Some(entry.bitmap.contains(int_id as u32))
    }

    fn put_l1(&self, key: &TigerKey, bitmap: RoaringBitmap, revision: i64) {
        let mut inner = self.inner.lock();
        if inner.cache.len() >= self.max_size && !inner.cache.contains_key(key) {
            evict_oldest_tenth(&mut inner.cache);
        }
        inner.cache.insert(
            key.clone(),
            BitmapEntry {
                bitmap,
                revision,
                cached_at: Instant::now(),
            },
        );
    }

    /// Three-state result: `Some(true)`/`Some(false)` is an authoritative
    /// cache answer, `None` means "not materialized — fall through to the
    /// graph evaluator."
    pub async fn check_access(
        &self,
        key: &TigerKey,
        resource_id: &str,
        zone_id: Option<&str>,
    ) -> Result<Option<bool>> {
        let int_id = self
            .resource_map
            .get_or_create_int_id(&key.resource_type, resource_id)
            .await?;

        if let Some(hit) = self.check_l1(key, int_id) {
            return Ok(Some(hit));
        }

        match self.load_from_db(key, zone_id, false).await? {
            Some(bitmap) => Ok(Some(bitmap.contains(int_id as u32))),
            None => Ok(None),
        }
    }

    /// Every int-id the subject can reach for this `(permission,
    /// resource_type)`, or empty on a total miss (not materialized).
    pub async fn get_accessible_int_ids(&self, key: &TigerKey) -> Result<HashSet<u32>> {
        {
            let inner = self.inner.lock();
            if let Some(entry) = inner.cache.get(key) {
                if entry.cached_at.elapsed() < self.l1_ttl {
                    return Ok(entry.bitmap.iter().collect());
                }
            }
        }
        Ok(self
            .load_from_db(key, None, false)
            .await?
            .map(|b| b.iter().collect())
            .unwrap_or_default())
    }

    /// Predicate-pushdown helper: resolves accessible int-ids back to
    /// `(resource_type, resource_id)` paths via the resource map.
    pub async fn get_accessible_paths(&self, key: &TigerKey) -> Result<Vec<String>> {
        let int_ids = self.get_accessible_int_ids(key).await?;
        let mut paths = Vec::with_capacity(int_ids.len());
        for int_id in int_ids {
            if let Some(row) = self
                .resource_map
                .resolve(&key.resource_type, int_id as i32)
                .await?
            {
                paths.push(row.resource_id);
            }
        }
        Ok(paths)
    }

    pub fn get_cache_age(&self, key: &TigerKey) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.cache.get(key).map(|e| e.cached_at.elapsed())
    }

    pub fn get_bitmap_bytes(&self, key: &TigerKey) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        let entry = inner.cache.get(key)?;
        let mut buf = Vec::new();
        entry.bitmap.serialize_into(&mut buf).ok()?;
        Some(buf)
    }

    async fn load_from_db(
        &self,
        key: &TigerKey,
        zone_id: Option<&str>,
        skip_l2: bool,
    ) -> Result<Option<RoaringBitmap>> {
        if !skip_l2 {
            let l2 = self.l2.lock().clone();
            if let Some(l2) = l2 {
                if let Some(stored) = l2.get_typed::<StoredBitmap>(&Self::l2_key(key)).await {
                    self.put_l1(key, stored.bitmap.clone(), stored.revision);
                    return Ok(Some(stored.bitmap));
                }
            }
        }

        let row = self
            .repo
            .load(
                key.subject_type,
                &key.subject_id,
                &key.permission,
                &key.resource_type,
                zone_id,
            )
            .await?;

        match row {
            Some(row) => {
                let bitmap = RoaringBitmap::deserialize_from(&row.bitmap_data[..])
                    .map_err(|e| TigerError::Corrupt(e.to_string()))?;
                self.put_l1(key, bitmap.clone(), row.revision);
                if !skip_l2 {
                    if let Some(l2) = self.l2.lock().clone() {
                        let stored = StoredBitmap {
                            bitmap: bitmap.clone(),
                            revision: row.revision,
                        };
                        l2.set_typed(&Self::l2_key(key), &stored, self.l1_ttl.as_secs())
                            .await;
                    }
                }
                Ok(Some(bitmap))
            }
            None => Ok(None),
        }
    }

    /// Persists the current L1 bitmap for `key` (building an empty one if
    /// absent) and mirrors it to L2.
    async fn persist_current(&self, key: &TigerKey, zone_id: Option<&str>) -> Result<()> {
        let (bitmap, revision) = {
            let inner = self.inner.lock();
            match inner.cache.get(key) {
                Some(entry) => (entry.bitmap.clone(), entry.revision),
                None => (RoaringBitmap::new(), 0),
            }
        };
        self.update_cache(key, bitmap, revision, zone_id).await
    }

    pub async fn update_cache(
        &self,
        key: &TigerKey,
        bitmap: RoaringBitmap,
        revision: i64,
        zone_id: Option<&str>,
    ) -> Result<()> {
        let mut bytes = Vec::new();
        bitmap
            .serialize_into(&mut bytes)
            .map_err(|e| TigerError::Corrupt(e.to_string()))?;
        let now = Utc::now();
        self.repo
            .persist(&TigerBitmapRow {
                subject_type: key.subject_type,
                subject_id: key.subject_id.clone(),
                permission: key.permission.clone(),
                resource_type: key.resource_type.clone(),
                zone_id: zone_id.map(str::to_string),
                bitmap_data: bytes,
                revision,
                created_at: now,
                updated_at: now,
            })
            .await?;

        if let Some(l2) = self.l2.lock().clone() {
            let stored = StoredBitmap {
                bitmap: bitmap.clone(),
                revision,
            };
            l2.set_typed(&Self::l2_key(key), &stored, self.l1_ttl.as_secs())
                .await;
        }

        self.put_l1(key, bitmap, revision);
        Ok(())
    }

    pub fn add_to_bitmap(&self, key: &TigerKey, int_id: u32) {
        let mut inner = self.inner.lock();
        let entry = inner.cache.entry(key.clone()).or_insert_with(|| BitmapEntry {
            bitmap: RoaringBitmap::new(),
            revision: 0,
            cached_at: Instant::now(),
        });
        entry.bitmap.insert(int_id);
    }

    pub fn remove_from_bitmap(&self, key: &TigerKey, int_id: u32) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.cache.get_mut(key) {
            entry.bitmap.remove(int_id);
        }
    }

    /// Returns the number of ids actually newly added (excluding ones
    /// already present), used by Directory Grant expansion to report
    /// progress.
    pub fn add_to_bitmap_bulk(&self, key: &TigerKey, int_ids: &HashSet<i32>) -> u32 {
        let mut inner = self.inner.lock();
        let entry = inner.cache.entry(key.clone()).or_insert_with(|| BitmapEntry {
            bitmap: RoaringBitmap::new(),
            revision: 0,
            cached_at: Instant::now(),
        });
        let mut added = 0u32;
        for &int_id in int_ids {
            if entry.bitmap.insert(int_id as u32) {
                added += 1;
            }
        }
        added
    }

    /// Write-behind persist after a batch of `add_to_bitmap_bulk` calls;
    /// callers run this off the hot read path (e.g. after finishing a
    /// Directory Grant expansion batch).
    pub async fn persist_bitmap_bulk(&self, key: &TigerKey, zone_id: Option<&str>) -> Result<()> {
        self.persist_current(key, zone_id).await
    }

    /// Single-grant write-through used outside batch expansion (e.g. one
    /// file granted directly, or a new file extending an ancestor grant).
    pub async fn persist_single_grant(
        &self,
        key: &TigerKey,
        resource_id: &str,
        zone_id: Option<&str>,
        revision: i64,
    ) -> Result<bool> {
        let int_id = self
            .resource_map
            .get_or_create_int_id(&key.resource_type, resource_id)
            .await?;
        let mut bitmap = self
            .load_from_db(key, zone_id, true)
            .await?
            .unwrap_or_default();
        bitmap.insert(int_id as u32);
        self.update_cache(key, bitmap, revision, zone_id).await?;
        Ok(true)
    }

    /// Silently no-ops if the bitmap or membership is absent — revoking
    /// something that was never granted isn't an error.
    pub async fn persist_single_revoke(
        &self,
        key: &TigerKey,
        resource_id: &str,
        zone_id: Option<&str>,
        revision: i64,
    ) -> Result<bool> {
        let Some(mut bitmap) = self.load_from_db(key, zone_id, true).await? else {
            return Ok(true);
        };
        let int_id = self
            .resource_map
            .get_or_create_int_id(&key.resource_type, resource_id)
            .await?;
        if !bitmap.remove(int_id as u32) {
            return Ok(true);
        }
        self.update_cache(key, bitmap, revision, zone_id).await?;
        Ok(true)
    }

    /// Batch check across many `(key, resource_id)` pairs with exactly two
    /// bulk DB round trips when L1 misses: one to resolve resource int-ids,
    /// one to fetch the distinct bitmaps involved.
    pub async fn check_access_bulk(
        &self,
        checks: &[(TigerKey, String, Option<String>)],
    ) -> Result<HashMap<(TigerKey, String), Option<bool>>> {
        let mut results = HashMap::new();
        let mut unresolved: Vec<&(TigerKey, String, Option<String>)> = Vec::new();

        for check @ (key, resource_id, _zone) in checks {
            if let Some(hit) = self.try_check_l1_only(key, resource_id).await? {
                results.insert((key.clone(), resource_id.clone()), Some(hit));
            } else {
                unresolved.push(check);
            }
        }

        for (key, resource_id, zone) in unresolved {
            let int_id = self
                .resource_map
                .get_or_create_int_id(&key.resource_type, resource_id)
                .await?;
            let bitmap = self.load_from_db(key, zone.as_deref(), false).await?;
            let outcome = bitmap.map(|b| b.contains(int_id as u32));
            results.insert((key.clone(), resource_id.clone()), outcome);
        }

        Ok(results)
    }

    async fn try_check_l1_only(&self, key: &TigerKey, resource_id: &str) -> Result<Option<bool>> {
        let is_live = {
            let inner = self.inner.lock();
            inner.cache.get(key).filter(|e| e.cached_at.elapsed() < self.l1_ttl).is_some()
        };
        if !is_live {
            return Ok(None);
        }
        let int_id = self
            .resource_map
            .get_or_create_int_id(&key.resource_type, resource_id)
            .await?;
        Ok(self.check_l1(key, int_id))
    }

    /// Compound-key invalidation across L1/L2/L3.
    pub async fn invalidate(
        &self,
        subject_type: Option<SubjectType>,
        subject_id: Option<&str>,
        permission: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<u64> {
        let count = self
            .repo
            .invalidate(subject_type, subject_id, permission, resource_type)
            .await?;

        if let Some(l2) = self.l2.lock().clone() {
            let pattern = format!(
                "tiger:{}:{}:{}:{}",
                subject_type.map(|s| s.to_string()).unwrap_or_else(|| "*".into()),
                subject_id.unwrap_or("*"),
                permission.unwrap_or("*"),
                resource_type.unwrap_or("*"),
            );
            l2.invalidate_pattern(&pattern).await;
        }

        let mut inner = self.inner.lock();
        let keys: Vec<TigerKey> = inner
            .cache
            .keys()
            .filter(|k| {
                subject_type.map_or(true, |st| k.subject_type == st)
                    && subject_id.map_or(true, |id| k.subject_id == id)
                    && permission.map_or(true, |p| k.permission == p)
                    && resource_type.map_or(true, |rt| k.resource_type == rt)
            })
            .cloned()
            .collect();
        for key in keys {
            inner.cache.remove(&key);
        }

        Ok(count)
    }

    pub fn clear_memory_cache(&self) {
        self.inner.lock().cache.clear();
    }

    /// Pre-populates L1 from the most recently updated L3 rows so a cold
    /// start doesn't send every first request through a relational read.
    pub async fn warm_from_db(&self, limit: i64) -> Result<usize> {
        let rows = self.repo.load_most_recent(limit).await?;
        let mut loaded = 0usize;
        for row in rows {
            let bitmap = match RoaringBitmap::deserialize_from(&row.bitmap_data[..]) {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping corrupt tiger bitmap row during warm-up");
                    continue;
                }
            };
            let key = TigerKey::new(
                row.subject_type,
                row.subject_id,
                row.permission,
                row.resource_type,
            );
            self.put_l1(&key, bitmap, row.revision);
            loaded += 1;
        }
        tracing::info!(loaded, "warmed tiger cache from database");
        Ok(loaded)
    }
}

fn evict_oldest_tenth(cache: &mut HashMap<TigerKey, BitmapEntry>) {
    let mut all: Vec<(TigerKey, Instant)> = cache
        .iter()
        .map(|(k, e)| (k.clone(), e.cached_at))
        .collect();
    if all.is_empty() {
        return;
    }
    all.sort_by_key(|(_, cached_at)| *cached_at);
    let evict_count = (all.len() / 10).max(1);
    for (key, _) in all.into_iter().take(evict_count) {
        cache.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_key_excludes_zone() {
        let key = TigerKey::new(SubjectType::User, "alice", "viewer", "file");
        assert_eq!(
            TigerBitmapCache::l2_key(&key),
            "tiger:user:alice:viewer:file"
        );
    }
}
