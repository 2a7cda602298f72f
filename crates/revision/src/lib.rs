//! Revision Service: per-zone monotonic counters behind an atomic
//! upsert-and-increment, with a short-lived local cache on reads so a hot
//! zone's `current()` doesn't round-trip to Postgres on every call.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use nexus_storage::RevisionRepository;

/// Revision buckets are embedded in L1 cache keys so independent processes
/// agree on the same key within a window without coordinating.
/// `revision // window`, not wall-clock based — this replaces the
/// deprecated `quantization_interval` wall-clock quantizer, which is
/// accepted but ignored for backward compatibility.
pub const DEFAULT_REVISION_WINDOW: i64 = 10;

pub struct RevisionService {
    repo: RevisionRepository,
    /// `current()` results cached for at most ~1s per zone to amortize
    /// lookups.
    local_cache: Cache<String, i64>,
}

impl RevisionService {
    pub fn new(repo: RevisionRepository) -> Self {
        Self {
            repo,
            local_cache: Cache::builder()
                .time_to_live(Duration::from_millis(1000))
                .max_capacity(10_000)
                .build(),
        }
    }

    /// Atomically increments the zone's counter and returns the new
    /// revision. Invalidates this zone's locally cached `current()` value
    /// so a subsequent read-your-writes check sees the bump immediately.
    pub async fn bump(&self, zone_id: &str) -> Result<i64, nexus_storage::StorageError> {
        let revision = self.repo.bump(zone_id).await?;
        self.local_cache.insert(zone_id.to_string(), revision).await;
        tracing::debug!(zone_id, revision, "revision bumped");
        Ok(revision)
    }

    /// Last seen revision for `zone_id`, served from the local cache when
    /// fresh and falling back to the repository otherwise.
    pub async fn current(&self, zone_id: &str) -> Result<i64, nexus_storage::StorageError> {
        if let Some(cached) = self.local_cache.get(zone_id).await {
            return Ok(cached);
        }
        let revision = self.repo.current(zone_id).await?;
        self.local_cache.insert(zone_id.to_string(), revision).await;
        Ok(revision)
    }

    /// `revision // window`: the bucket used to compose revision-quantized
    /// L1 cache keys.
    pub fn quantize(revision: i64, window: i64) -> i64 {
        if window <= 0 {
            return revision;
        }
        revision.div_euclid(window)
    }
}

pub type SharedRevisionService = Arc<RevisionService>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_buckets_by_window() {
        assert_eq!(RevisionService::quantize(0, 10), 0);
        assert_eq!(RevisionService::quantize(9, 10), 0);
        assert_eq!(RevisionService::quantize(10, 10), 1);
        assert_eq!(RevisionService::quantize(23, 10), 2);
    }

    #[test]
    fn quantize_handles_degenerate_window() {
        assert_eq!(RevisionService::quantize(42, 0), 42);
    }
}
