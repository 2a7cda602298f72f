//! Tuple Store: public facade over `TupleRepository` that serializes
//! writes per `(zone, object_type, object_id)` and drives the "tuple
//! insert/delete/expiry" invalidation row after every mutation.
//!
//! `TupleRepository::write` commits the tuple insert and its changelog row
//! atomically, but the zone revision bump is a separate round trip (the
//! repository has no reason to know about zones or revisions — that's the
//! Invalidation Fabric's job). The short window between the two means a
//! reader could, in principle, observe the new tuple in `minimize_latency`
//! mode microseconds before the revision bump lands; `at_least_as_fresh`
//! callers are unaffected since they always re-check `current()` before
//! trusting a cache hit.

use std::sync::Arc;

use uuid::Uuid;

use nexus_concurrency::KeyedMutex;
use nexus_invalidation::InvalidationFabric;
use nexus_models::{ConsistencyToken, RelationTuple};
use nexus_storage::{TupleFilter, TupleRepository, WriteTupleInput};

use crate::error::Result;

pub struct TupleStore {
    repo: TupleRepository,
    fabric: Arc<InvalidationFabric>,
    write_locks: KeyedMutex<String>,
}

impl TupleStore {
    pub fn new(repo: TupleRepository, fabric: Arc<InvalidationFabric>) -> Self {
        Self {
            repo,
            fabric,
            write_locks: KeyedMutex::new(),
        }
    }

    fn lock_key(zone_id: &str, object_type: &str, object_id: &str) -> String {
        format!("{zone_id}:{object_type}:{object_id}")
    }

    /// `write`. Serialized per object so two concurrent writers to the
    /// same object can't race the invalidation fabric's read of the tuple
    /// they just wrote against each other's.
    pub async fn write(
        &self,
        input: WriteTupleInput,
        zone_id: &str,
    ) -> Result<(RelationTuple, ConsistencyToken)> {
        let _guard = self
            .write_locks
            .lock(Self::lock_key(zone_id, &input.object_type, &input.object_id))
            .await;

        let tuple = self.repo.write(input).await?;
        let revision = self.fabric.on_tuple_change(&tuple, zone_id).await?;
        Ok((tuple, ConsistencyToken::new(revision)))
    }

    /// `delete`. Looks the tuple up first so invalidation still knows
    /// the subject/object pair to target after the row is gone; returns
    /// `None` when the tuple never existed or was already deleted, matching
    /// `TupleRepository::delete`'s "not found is not a failure" contract.
    pub async fn delete(&self, tuple_id: Uuid, zone_id: &str) -> Result<Option<ConsistencyToken>> {
        let Some(tuple) = self.repo.get(tuple_id).await? else {
            return Ok(None);
        };

        let _guard = self
            .write_locks
            .lock(Self::lock_key(zone_id, &tuple.object_type, &tuple.object_id))
            .await;

        if !self.repo.delete(tuple_id).await? {
            return Ok(None);
        }

        let revision = self.fabric.on_tuple_change(&tuple, zone_id).await?;
        Ok(Some(ConsistencyToken::new(revision)))
    }

    pub async fn list(&self, filter: TupleFilter) -> Result<Vec<RelationTuple>> {
        Ok(self.repo.list(filter).await?)
    }

    /// Sweeps every tuple whose `expires_at` has passed, regardless of
    /// zone (the tuple store has no zone column to filter on), then
    /// invalidates each one against `zone_id` — the caller picks the zone
    /// whose cached reads this sweep should freshen.
    pub async fn sweep_expired(&self, zone_id: &str) -> Result<Vec<RelationTuple>> {
        let expired = self.repo.sweep_expired().await?;
        for tuple in &expired {
            self.fabric.on_tuple_change(tuple, zone_id).await?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_scoped_to_zone_and_object() {
        let a = TupleStore::lock_key("zone-a", "file", "/doc");
        let b = TupleStore::lock_key("zone-b", "file", "/doc");
        assert_ne!(a, b, "same object in different zones must not share a lock key");
        assert_eq!(a, "zone-a:file:/doc");
    }

    #[test]
    fn lock_key_distinguishes_object_type_from_object_id() {
        let a = TupleStore::lock_key("zone-a", "file", "doc");
        let b = TupleStore::lock_key("zone-a", "memory", "doc");
        assert_ne!(a, b);
    }
}
