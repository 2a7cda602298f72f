//! Namespace Store: public facade over `NamespaceRepository` that drives
//! the "namespace update" invalidation row on every write.

use std::sync::Arc;

use nexus_invalidation::InvalidationFabric;
use nexus_models::{ConsistencyToken, Namespace, NamespaceConfig};
use nexus_storage::NamespaceRepository;

use crate::error::Result;

pub struct NamespaceStore {
    repo: NamespaceRepository,
    fabric: Arc<InvalidationFabric>,
}

impl NamespaceStore {
    pub fn new(repo: NamespaceRepository, fabric: Arc<InvalidationFabric>) -> Self {
        Self { repo, fabric }
    }

    /// `create_or_update`. Always invalidates — even a no-op upsert
    /// that re-saves an identical schema can't be distinguished cheaply
    /// from a real change, and stale cached permissions are worse than one
    /// unnecessary flush.
    pub async fn create_or_update(
        &self,
        object_type: &str,
        config: &NamespaceConfig,
        zone_id: &str,
    ) -> Result<(Namespace, ConsistencyToken)> {
        let namespace = self.repo.create_or_update(object_type, config).await?;
        let revision = self.fabric.on_namespace_update(object_type, zone_id).await?;
        Ok((namespace, ConsistencyToken::new(revision)))
    }

    pub async fn get(&self, object_type: &str) -> Result<Option<Namespace>> {
        Ok(self.repo.get(object_type).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Namespace>> {
        Ok(self.repo.list_all().await?)
    }

    /// Idempotently ensures the built-in `file`, `group`, `memory`
    /// namespaces exist.
    pub async fn seed_defaults(&self) -> Result<()> {
        Ok(self.repo.seed_defaults().await?)
    }
}
