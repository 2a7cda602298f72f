//! Invalidation Fabric: translates tuple and namespace write events into
//! cache invalidation across all three read-side layers. Pure
//! orchestration — every actual cache mutation is delegated to
//! `nexus-cache`'s `PermissionCache`/`DistributedCache` or
//! `nexus-tiger`'s `TigerBitmapCache`; this crate only decides which calls
//! the trigger matrix requires and in what order.

use std::sync::Arc;

use nexus_cache::{DistributedCache, PermissionCache};
use nexus_models::tuple::SubjectType;
use nexus_models::RelationTuple;
use nexus_revision::SharedRevisionService;
use nexus_tiger::{TigerBitmapCache, TigerKey};

use crate::error::Result;

/// Relations whose change widens invalidation beyond the written pair: a
/// membership or hierarchy edge can retroactively change permissions
/// derived through `tupleToUserset`/`computed_userset` for many other
/// subjects or objects, not just the one pair written.
const WIDENING_RELATIONS: &[&str] = &["parent", "member", "member_of"];

pub fn is_widening_relation(relation: &str) -> bool {
    WIDENING_RELATIONS.contains(&relation)
}

/// Wires the L1/L2/Tiger layers and the revision service together and
/// drives the invalidation trigger matrix. Cheap to clone (holds only
/// `Arc`s and a
/// `SharedRevisionService`, itself an `Arc`); share via `Arc<InvalidationFabric>`
/// the way the other composition-root components are shared.
pub struct InvalidationFabric {
    l1: Arc<PermissionCache>,
    l2: Option<Arc<DistributedCache>>,
    tiger: Arc<TigerBitmapCache>,
    revisions: SharedRevisionService,
}

impl InvalidationFabric {
    pub fn new(
        l1: Arc<PermissionCache>,
        l2: Option<Arc<DistributedCache>>,
        tiger: Arc<TigerBitmapCache>,
        revisions: SharedRevisionService,
    ) -> Self {
        Self {
            l1,
            l2,
            tiger,
            revisions,
        }
    }

    /// Tuple insert, delete, or expiry sweep: pair-scoped
    /// L1 invalidation, widened to the subject or object when the tuple
    /// itself is a userset-as-subject edge or uses a hierarchy relation,
    /// plus an L2 pattern invalidation and a conservative Tiger revoke.
    /// Returns the zone's new revision so the caller can hand it back to
    /// writers as a `ConsistencyToken`.
    pub async fn on_tuple_change(&self, tuple: &RelationTuple, zone_id: &str) -> Result<i64> {
        let subject_type = tuple.subject_type.to_string();

        self.l1.invalidate_subject_object_pair(
            zone_id,
            &subject_type,
            &tuple.subject_id,
            &tuple.object_type,
            &tuple.object_id,
        );

        let mut l2_patterns = vec![format!(
            "nexus:l1:{}:{}:*:{}:{}",
            subject_type, tuple.subject_id, tuple.object_type, tuple.object_id
        )];

        if tuple.is_userset_as_subject() {
            self.l1
                .invalidate_object(zone_id, &tuple.object_type, &tuple.object_id);
            l2_patterns.push(format!(
                "nexus:l1:*:*:*:{}:{}",
                tuple.object_type, tuple.object_id
            ));
        }

        if is_widening_relation(&tuple.relation) {
            self.l1
                .invalidate_subject(zone_id, &subject_type, &tuple.subject_id);
            l2_patterns.push(format!("nexus:l1:{}:{}:*:*:*", subject_type, tuple.subject_id));
            tracing::debug!(
                relation = %tuple.relation,
                object_type = %tuple.object_type,
                object_id = %tuple.object_id,
                "widening invalidation for hierarchy relation"
            );
        }

        if let Some(l2) = &self.l2 {
            for pattern in &l2_patterns {
                l2.invalidate_pattern(pattern).await;
            }
        }

        // Tiger is keyed by materialized permission, not raw relation, so a
        // tuple write can't be mapped to the exact Tiger keys it affects
        // without walking every permission in the namespace. Conservatively
        // revoke every permission/resource_type materialized for this
        // subject; a correct answer on the next `check` is worth the wider
        // blast radius.
        let subject_type_enum: SubjectType = subject_type
            .parse()
            .unwrap_or(tuple.subject_type);
        self.tiger
            .invalidate(Some(subject_type_enum), Some(&tuple.subject_id), None, None)
            .await?;

        if is_widening_relation(&tuple.relation) {
            self.tiger
                .invalidate(None, None, None, Some(&tuple.object_type))
                .await?;
        }

        Ok(self.revisions.bump(zone_id).await?)
    }

    /// Namespace rewrite update: every cached decision for
    /// the affected `object_type` may now be wrong, and there's no
    /// object-type-wide L1 index, so this flushes the whole process-local L1
    /// rather than add one purely for this rare event.
    pub async fn on_namespace_update(&self, object_type: &str, zone_id: &str) -> Result<i64> {
        tracing::warn!(object_type, "namespace updated, flushing process-local L1 cache");
        self.l1.clear();

        if let Some(l2) = &self.l2 {
            l2.invalidate_pattern(&format!("nexus:l1:*:*:*:{object_type}:*"))
                .await;
        }

        self.tiger.invalidate(None, None, None, Some(object_type)).await?;

        Ok(self.revisions.bump(zone_id).await?)
    }

    /// Directory-grant bitmap add: L2/Tiger are already
    /// updated write-through by `nexus-tiger`'s `DirectoryGrantManager`; this
    /// only covers the revision-bump leg so callers that don't go through
    /// the manager directly can still hand back a fresh `ConsistencyToken`.
    /// L1 is deliberately left untouched — a new grant only adds access, it
    /// can't turn a cached grant stale.
    pub async fn on_directory_grant_change(&self, zone_id: &str) -> Result<i64> {
        Ok(self.revisions.bump(zone_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_relations_widen_invalidation() {
        assert!(is_widening_relation("parent"));
        assert!(is_widening_relation("member"));
        assert!(is_widening_relation("member_of"));
        assert!(!is_widening_relation("viewer"));
        assert!(!is_widening_relation("owner"));
    }
}
