//! Directory Grant Manager: pre-materializes a directory-level grant into
//! every descendant file's Tiger bitmap, and extends completed grants to
//! newly created files under the same subtree.

use std::collections::HashSet;
use std::sync::Arc;

use nexus_models::directory_grant::ExpansionStatus;
use nexus_models::tuple::SubjectType;
use nexus_models::DirectoryGrant;
use nexus_revision::SharedRevisionService;
use nexus_storage::{DirectoryGrantRepository, ResourceMapRepository};

use crate::bitmap::TigerBitmapCache;
use crate::error::Result;
use crate::key::TigerKey;

/// Descendant files are expanded in batches of this size so a grant over a
/// million-file tree doesn't hold one giant array in memory at once.
pub const EXPANSION_BATCH_SIZE: usize = 1000;

pub struct DirectoryGrantManager {
    repo: DirectoryGrantRepository,
    resource_map: ResourceMapRepository,
    revisions: SharedRevisionService,
    bitmaps: Arc<TigerBitmapCache>,
}

impl DirectoryGrantManager {
    /// Takes a shared `Arc<TigerBitmapCache>` rather than an owned cache so
    /// a composition root can hand the same L1-bitmap process state to both
    /// this manager and `nexus-engine`'s `PermissionEngine` — two private
    /// in-memory caches would silently disagree on what's materialized.
    pub fn new(
        repo: DirectoryGrantRepository,
        resource_map: ResourceMapRepository,
        revisions: SharedRevisionService,
        bitmaps: Arc<TigerBitmapCache>,
    ) -> Self {
        Self {
            repo,
            resource_map,
            revisions,
            bitmaps,
        }
    }

    /// Records (or refreshes) the grant row. The caller drives expansion
    /// separately via `expand` — recording and expanding are split so a
    /// caller enumerating a huge subtree can do so off the request path.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_grant(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        directory_path: &str,
        zone_id: Option<&str>,
        grant_revision: i64,
        include_future_files: bool,
    ) -> Result<DirectoryGrant> {
        Ok(self
            .repo
            .upsert(
                subject_type,
                subject_id,
                permission,
                directory_path,
                zone_id,
                grant_revision,
                include_future_files,
            )
            .await?)
    }

    /// Expands `grant` over `descendants` (every file path under its
    /// directory), updating progress after each batch so a crash mid-scan
    /// leaves `expanded_count`/`total_count` queryable rather than silently
    /// stuck. Re-running `expand` on an `in_progress` grant is safe: adding
    /// an already-present int-id to the bitmap is a no-op.
    pub async fn expand(
        &self,
        grant: &DirectoryGrant,
        descendants: &[String],
        zone_id: Option<&str>,
    ) -> Result<(i64, bool)> {
        let key = TigerKey::new(
            grant.subject_type,
            grant.subject_id.clone(),
            grant.permission.clone(),
            "file",
        );

        if descendants.is_empty() {
            self.repo
                .update_progress(grant.grant_id, ExpansionStatus::Completed, 0, 0, None)
                .await?;
            return Ok((0, true));
        }

        self.repo
            .update_progress(
                grant.grant_id,
                ExpansionStatus::InProgress,
                0,
                descendants.len() as i64,
                None,
            )
            .await?;

        let mut total_expanded: i64 = 0;
        let result = self
            .expand_batches(&key, descendants, grant, zone_id, &mut total_expanded)
            .await;

        match result {
            Ok(()) => {
                self.bitmaps.persist_bitmap_bulk(&key, zone_id).await?;
                self.repo
                    .update_progress(
                        grant.grant_id,
                        ExpansionStatus::Completed,
                        total_expanded,
                        descendants.len() as i64,
                        None,
                    )
                    .await?;
                tracing::info!(
                    directory_path = %grant.directory_path,
                    total_expanded,
                    "directory grant expansion completed"
                );
                Ok((total_expanded, true))
            }
            Err(err) => {
                self.repo
                    .update_progress(
                        grant.grant_id,
                        ExpansionStatus::Failed,
                        total_expanded,
                        descendants.len() as i64,
                        Some(&err.to_string()),
                    )
                    .await?;
                Ok((total_expanded, false))
            }
        }
    }

    async fn expand_batches(
        &self,
        key: &TigerKey,
        descendants: &[String],
        grant: &DirectoryGrant,
        zone_id: Option<&str>,
        total_expanded: &mut i64,
    ) -> Result<()> {
        for (batch_index, batch) in descendants.chunks(EXPANSION_BATCH_SIZE).enumerate() {
            let mut int_ids = HashSet::with_capacity(batch.len());
            for path in batch {
                let int_id = self.resource_map.get_or_create_int_id("file", path).await?;
                int_ids.insert(int_id);
            }

            let added = self.bitmaps.add_to_bitmap_bulk(key, &int_ids);
            *total_expanded += added as i64;

            self.repo
                .update_progress(
                    grant.grant_id,
                    ExpansionStatus::InProgress,
                    *total_expanded,
                    descendants.len() as i64,
                    None,
                )
                .await?;

            tracing::debug!(
                batch = batch_index + 1,
                added,
                total_expanded = *total_expanded,
                total = descendants.len(),
                "expanded directory grant batch"
            );
        }
        Ok(())
    }

    pub async fn remove_grant(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        permission: &str,
        directory_path: &str,
        zone_id: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .repo
            .delete(subject_type, subject_id, permission, directory_path, zone_id)
            .await?)
    }

    /// Called when a new file lands under a directory: finds every
    /// completed, future-inclusive ancestor grant and extends it to cover
    /// the new file, write-through (no batching — this is a single file).
    /// Bumps the zone revision once if anything changed, so `at_least_as_fresh`
    /// readers see the new membership.
    pub async fn add_file_to_ancestor_grants(
        &self,
        file_path: &str,
        zone_id: Option<&str>,
    ) -> Result<u32> {
        // Registering the file in the resource map must happen regardless
        // of whether any ancestor grant exists, so predicate pushdown over
        // `file` resources stays correct (see `ResourceMapRepository`).
        self.resource_map.get_or_create_int_id("file", file_path).await?;

        let grants = self.repo.find_covering(file_path, zone_id).await?;
        if grants.is_empty() {
            return Ok(0);
        }

        let mut added = 0u32;
        for grant in &grants {
            let key = TigerKey::new(
                grant.subject_type,
                grant.subject_id.clone(),
                grant.permission.clone(),
                "file",
            );
            if self
                .bitmaps
                .persist_single_grant(&key, file_path, zone_id, grant.grant_revision)
                .await?
            {
                added += 1;
            }
        }

        if added > 0 {
            if let Some(zone) = zone_id {
                let revision = self.revisions.bump(zone).await?;
                tracing::debug!(zone_id = zone, revision, "bumped zone revision after ancestor grant expansion");
            }
            tracing::info!(file_path, added, "new file added to ancestor directory grants");
        }

        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::EXPANSION_BATCH_SIZE;

    #[test]
    fn batch_size_matches_leopard_style_expansion_chunking() {
        assert_eq!(EXPANSION_BATCH_SIZE, 1000);
    }
}
