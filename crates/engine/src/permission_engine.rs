//! Permission Engine: wires the Graph Evaluator, L1/L2 caches, and the
//! Tiger bitmap cache behind one `check` call, dispatching on
//! `ConsistencyMode`, with a Tiger fast-path and a circuit breaker in
//! front of the relational fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use nexus_abac::EvalContext;
use nexus_cache::{CacheKey, DistributedCache, PermissionCache};
use nexus_concurrency::{CircuitBreaker, CircuitCallError};
use nexus_graph::GraphEvaluator;
use nexus_models::{ConsistencyMode, SubjectRef};
use nexus_revision::{RevisionService, SharedRevisionService};
use nexus_tiger::{TigerBitmapCache, TigerKey};
use validator::Validate;

use crate::error::{EngineError, Result};

/// One `check` call's arguments, gathered into a struct since
/// `check(subject, permission, object, context?, zone?, consistency?)`
/// has more optional parameters than reads well positionally.
#[derive(Debug, Clone, Validate)]
pub struct CheckRequest {
    pub subject: SubjectRef,
    #[validate(length(min = 1, max = 64))]
    pub permission: String,
    #[validate(length(min = 1, max = 64))]
    pub object_type: String,
    #[validate(length(min = 1, max = 256))]
    pub object_id: String,
    pub context: Option<EvalContext>,
    pub tenant: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub zone_id: String,
    pub consistency: ConsistencyMode,
}

impl CheckRequest {
    pub fn new(
        subject: SubjectRef,
        permission: impl Into<String>,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            permission: permission.into(),
            object_type: object_type.into(),
            object_id: object_id.into(),
            context: None,
            tenant: None,
            zone_id: "default".to_string(),
            consistency: ConsistencyMode::default(),
        }
    }

    pub fn with_context(mut self, context: EvalContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tenant(mut self, tenant: Uuid) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = zone_id.into();
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyMode) -> Self {
        self.consistency = consistency;
        self
    }
}

pub struct PermissionEngine {
    graph: Arc<GraphEvaluator>,
    l1: Arc<PermissionCache>,
    l2: Option<Arc<DistributedCache>>,
    tiger: Arc<TigerBitmapCache>,
    revisions: SharedRevisionService,
    circuit: Arc<CircuitBreaker>,
    revision_window: i64,
}

impl PermissionEngine {
    pub fn new(
        graph: Arc<GraphEvaluator>,
        l1: Arc<PermissionCache>,
        l2: Option<Arc<DistributedCache>>,
        tiger: Arc<TigerBitmapCache>,
        revisions: SharedRevisionService,
        circuit: Arc<CircuitBreaker>,
        revision_window: i64,
    ) -> Self {
        Self {
            graph,
            l1,
            l2,
            tiger,
            revisions,
            circuit,
            revision_window,
        }
    }

    /// `check`. Dispatches on consistency mode before touching any cache
    /// layer:
    /// - `fully_consistent` skips L1/L2 entirely and evaluates fresh.
    /// - `at_least_as_fresh` only accepts an L1/L2 hit cached at or after
    ///   the zone's current revision.
    /// - `minimize_latency` (default) accepts any live hit regardless of
    ///   revision.
    pub async fn check(&self, req: CheckRequest) -> Result<bool> {
        req.validate()
            .map_err(|err| EngineError::InvalidInput(err.to_string()))?;

        let revision = self.revisions.current(&req.zone_id).await?;

        if matches!(req.consistency, ConsistencyMode::FullyConsistent) {
            return self.evaluate_fresh(&req).await;
        }

        let bucket = RevisionService::quantize(revision, self.revision_window);
        let key = CacheKey::new(
            req.subject.subject_type.to_string(),
            req.subject.subject_id.clone(),
            req.permission.clone(),
            req.object_type.clone(),
            req.object_id.clone(),
            Some(&req.zone_id),
            bucket,
        );

        let l1_hit = match req.consistency {
            ConsistencyMode::AtLeastAsFresh => self.l1.get_with_revision_check(&key, revision),
            _ => self.l1.get(&key),
        };
        if let Some(hit) = l1_hit {
            return Ok(hit);
        }

        if let Some(l2) = &self.l2 {
            if let Some((result, cached_revision)) = l2.get(&key).await {
                let fresh_enough = !matches!(req.consistency, ConsistencyMode::AtLeastAsFresh)
                    || cached_revision >= revision;
                if fresh_enough {
                    self.l1
                        .set(&key, result, Duration::ZERO, Some(&req.permission), false, cached_revision);
                    return Ok(result);
                }
            }
        }

        // The Tiger bitmap only attests a materialized grant/denial for
        // plain relation checks; a request carrying ABAC context can't be
        // answered from a bitmap alone, since the bitmap doesn't encode
        // per-request conditions.
        if req.context.is_none() {
            let tiger_key = TigerKey::new(
                req.subject.subject_type,
                req.subject.subject_id.clone(),
                req.permission.clone(),
                req.object_type.clone(),
            );
            if let Some(hit) = self
                .tiger
                .check_access(&tiger_key, &req.object_id, Some(&req.zone_id))
                .await?
            {
                self.l1.set(&key, hit, Duration::ZERO, Some(&req.permission), false, revision);
                if let Some(l2) = &self.l2 {
                    l2.set(&key, hit, revision, 0).await;
                }
                return Ok(hit);
            }
        }

        self.evaluate_and_cache(&req, &key, revision).await
    }

    /// Required to preserve input ordering. Each request independently
    /// goes through the same consistency-mode dispatch as `check`.
    pub async fn check_batch(&self, requests: Vec<CheckRequest>) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(requests.len());
        for req in requests {
            results.push(self.check(req).await?);
        }
        Ok(results)
    }

    pub async fn expand(&self, permission: &str, object_type: &str, object_id: &str) -> Result<Vec<SubjectRef>> {
        Ok(self.graph.expand(permission, object_type, object_id).await?)
    }

    pub async fn explain(
        &self,
        subject: &SubjectRef,
        permission: &str,
        object_type: &str,
        object_id: &str,
        context: Option<&EvalContext>,
        tenant: Option<Uuid>,
    ) -> Result<nexus_graph::explain::ExplainResult> {
        Ok(self
            .graph
            .explain(subject, permission, object_type, object_id, context, tenant)
            .await?)
    }

    /// `fully_consistent`: no cache layer is consulted, and none is
    /// populated either — this mode exists precisely for callers who don't
    /// trust any cache right now.
    async fn evaluate_fresh(&self, req: &CheckRequest) -> Result<bool> {
        Ok(self
            .graph
            .check(
                &req.subject,
                &req.permission,
                &req.object_type,
                &req.object_id,
                req.context.as_ref(),
                req.tenant,
            )
            .await?)
    }

    async fn evaluate_and_cache(&self, req: &CheckRequest, key: &CacheKey, revision: i64) -> Result<bool> {
        let graph = self.graph.clone();
        let subject = req.subject.clone();
        let permission = req.permission.clone();
        let object_type = req.object_type.clone();
        let object_id = req.object_id.clone();
        let context = req.context.clone();
        let tenant = req.tenant;
        let started = Instant::now();

        let outcome = self
            .circuit
            .call(move || async move {
                graph
                    .check(&subject, &permission, &object_type, &object_id, context.as_ref(), tenant)
                    .await
            })
            .await;

        match outcome {
            Ok(result) => {
                self.l1.set(
                    key,
                    result,
                    started.elapsed(),
                    Some(&req.permission),
                    false,
                    revision,
                );
                if let Some(l2) = &self.l2 {
                    l2.set(key, result, revision, 0).await;
                }
                Ok(result)
            }
            // On open, `check` returns the last cached value when
            // available. No cached value at all is a conservative deny
            // rather than an error — a read should never hard-fail just
            // because the store is unavailable.
            Err(CircuitCallError::Breaker(_)) => {
                tracing::warn!("circuit open, relational store unavailable, falling back to cache");
                Ok(self.l1.get(key).unwrap_or(false))
            }
            Err(CircuitCallError::Inner(err)) => Err(EngineError::Graph(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_models::SubjectType;

    fn subject() -> SubjectRef {
        SubjectRef::new(SubjectType::User, "alice")
    }

    #[test]
    fn new_request_defaults_to_minimize_latency_and_default_zone() {
        let req = CheckRequest::new(subject(), "read", "file", "/doc");
        assert_eq!(req.zone_id, "default");
        assert!(matches!(req.consistency, ConsistencyMode::MinimizeLatency));
        assert!(req.context.is_none());
        assert!(req.tenant.is_none());
    }

    #[test]
    fn builder_methods_override_defaults() {
        let tenant = Uuid::new_v4();
        let req = CheckRequest::new(subject(), "read", "file", "/doc")
            .with_tenant(tenant)
            .with_zone("zone-a")
            .with_consistency(ConsistencyMode::FullyConsistent);
        assert_eq!(req.tenant, Some(tenant));
        assert_eq!(req.zone_id, "zone-a");
        assert!(matches!(req.consistency, ConsistencyMode::FullyConsistent));
    }

    #[test]
    fn empty_permission_fails_validation() {
        let req = CheckRequest::new(subject(), "", "file", "/doc");
        assert!(req.validate().is_err());
    }

    #[test]
    fn well_formed_request_passes_validation() {
        let req = CheckRequest::new(subject(), "read", "file", "/doc");
        assert!(req.validate().is_ok());
    }
}
