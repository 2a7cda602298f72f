//! Composition root: wires every crate in the workspace into one handle.

use std::sync::Arc;

use nexus_cache::{DistributedCache, PermissionCache};
use nexus_concurrency::CircuitBreaker;
use nexus_graph::GraphEvaluator;
use nexus_invalidation::InvalidationFabric;
use nexus_revision::{RevisionService, SharedRevisionService};
use nexus_storage::{
    Database, DirectoryGrantRepository, NamespaceRepository, RefreshTokenRepository,
    ResourceMapRepository, RevisionRepository, TigerRepository, TupleRepository,
};
use nexus_tiger::{DirectoryGrantManager, TigerBitmapCache};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::namespace_store::NamespaceStore;
use crate::permission_engine::PermissionEngine;
use crate::refresh::RefreshTokenGuard;
use crate::tuple_store::TupleStore;

/// Every public surface of the core in one place. Each field is an `Arc`
/// so sync callers can hand a clone across a `run_blocking`/FUSE-style
/// thread boundary without the composition root itself needing to be
/// `'static` cloned wholesale.
pub struct NexusEngine {
    pub namespaces: Arc<NamespaceStore>,
    pub tuples: Arc<TupleStore>,
    pub permissions: Arc<PermissionEngine>,
    pub directory_grants: Arc<DirectoryGrantManager>,
    pub refresh_tokens: Arc<RefreshTokenGuard>,
    pub revisions: SharedRevisionService,
}

impl NexusEngine {
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let database = Database::connect(config.database).await?;
        let pool = database.pool().clone();

        let namespaces_repo = NamespaceRepository::new(pool.clone());
        let tuples_repo = TupleRepository::new(pool.clone());
        let resource_map_repo = ResourceMapRepository::new(pool.clone());
        let revision_repo = RevisionRepository::new(pool.clone());
        let directory_grant_repo = DirectoryGrantRepository::new(pool.clone());
        let tiger_repo = TigerRepository::new(pool.clone());
        let refresh_token_repo = RefreshTokenRepository::new(pool.clone());

        let revisions: SharedRevisionService = Arc::new(RevisionService::new(revision_repo));

        let l1 = Arc::new(PermissionCache::new(config.cache));

        let l2 = if config.redis_enabled {
            match DistributedCache::connect(config.redis).await {
                Ok(cache) => Some(Arc::new(cache)),
                Err(err) => {
                    tracing::warn!(error = %err, "L2 distributed cache unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let tiger = Arc::new(TigerBitmapCache::new(tiger_repo, resource_map_repo.clone()));
        if let Some(l2) = &l2 {
            tiger.set_distributed_cache(Some(l2.clone()));
        }

        let graph = Arc::new(GraphEvaluator::new(
            namespaces_repo.clone(),
            tuples_repo.clone(),
            config.graph,
        ));

        let fabric = Arc::new(InvalidationFabric::new(
            l1.clone(),
            l2.clone(),
            tiger.clone(),
            revisions.clone(),
        ));

        let circuit = Arc::new(CircuitBreaker::new(config.circuit_breaker));

        let namespaces = Arc::new(NamespaceStore::new(namespaces_repo, fabric.clone()));
        let tuples = Arc::new(TupleStore::new(tuples_repo, fabric));
        let permissions = Arc::new(PermissionEngine::new(
            graph,
            l1,
            l2,
            tiger.clone(),
            revisions.clone(),
            circuit,
            config.revision_window,
        ));
        let directory_grants = Arc::new(DirectoryGrantManager::new(
            directory_grant_repo,
            resource_map_repo,
            revisions.clone(),
            tiger,
        ));
        let refresh_tokens = Arc::new(RefreshTokenGuard::new(refresh_token_repo));

        Ok(Self {
            namespaces,
            tuples,
            permissions,
            directory_grants,
            refresh_tokens,
            revisions,
        })
    }

    /// Runs `future` to completion on `handle`, for sync callers (the FUSE
    /// surface and similar out-of-process collaborators that can't
    /// themselves be `async`.
    pub fn block_on<F: std::future::Future>(&self, handle: &tokio::runtime::Handle, future: F) -> F::Output {
        nexus_concurrency::block_on_handle(handle, future)
    }
}
