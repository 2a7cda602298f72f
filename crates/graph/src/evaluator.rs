//! Graph Evaluator: `check`/`check_batch`, dispatching over the namespace
//! rewrite algebra (`this`/`union`/`intersection`/`exclusion`/
//! `tupleToUserset`) with explicit visit-set cycle detection and a depth
//! guard.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use nexus_abac::EvalContext;
use nexus_models::namespace::canonicalize;
use nexus_models::{RelationTuple, RewriteExpr, SubjectRef};
use nexus_storage::{NamespaceRepository, TupleFilter, TupleRepository};

use crate::config::GraphConfig;
use crate::error::Result;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A step in the evaluation: either a name to resolve against the
/// namespace's `permissions`/`relations` maps, or a rewrite expression
/// already reached while walking one of those entries, carrying the
/// enclosing relation name so a nested `this` knows which relation's tuples
/// it means.
#[derive(Debug, Clone)]
enum EvalNode {
    Name(String),
    Expr(RewriteExpr, String),
}

impl EvalNode {
    /// The string used in the cycle-detection visit key. Dictionary-shaped
    /// permissions are JSON-canonicalized so two structurally identical
    /// rewrites share a visit key regardless of traversal order.
    fn visit_token(&self) -> String {
        match self {
            EvalNode::Name(name) => name.clone(),
            EvalNode::Expr(expr, _) => canonicalize(expr),
        }
    }
}

pub struct GraphEvaluator {
    namespaces: NamespaceRepository,
    tuples: TupleRepository,
    config: GraphConfig,
}

impl GraphEvaluator {
    pub fn new(namespaces: NamespaceRepository, tuples: TupleRepository, config: GraphConfig) -> Self {
        Self {
            namespaces,
            tuples,
            config,
        }
    }

    /// `check(subject, permission, object, context?, zone?, consistency?)
    /// → bool`. Consistency-mode dispatch (which cache layer to try first)
    /// lives in `nexus-engine`; this always evaluates against the live
    /// tuple store.
    pub async fn check(
        &self,
        subject: &SubjectRef,
        permission: &str,
        object_type: &str,
        object_id: &str,
        context: Option<&EvalContext>,
        tenant: Option<Uuid>,
    ) -> Result<bool> {
        let mut visited = HashSet::new();
        self.eval(
            subject,
            EvalNode::Name(permission.to_string()),
            object_type,
            object_id,
            context,
            tenant,
            &mut visited,
            0,
        )
        .await
    }

    /// Logically N checks with shared cache lookups, required to preserve
    /// input ordering. The shared-cache aspect lives one layer up
    /// (`nexus-engine` consults L1/L2/Tiger before falling back to this
    /// graph walk); this preserves ordering over N independent
    /// evaluations.
    pub async fn check_batch(
        &self,
        requests: &[(SubjectRef, String, String, String)],
        context: Option<&EvalContext>,
        tenant: Option<Uuid>,
    ) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(requests.len());
        for (subject, permission, object_type, object_id) in requests {
            results.push(
                self.check(subject, permission, object_type, object_id, context, tenant)
                    .await?,
            );
        }
        Ok(results)
    }

    fn eval<'a>(
        &'a self,
        subject: &'a SubjectRef,
        node: EvalNode,
        object_type: &'a str,
        object_id: &'a str,
        context: Option<&'a EvalContext>,
        tenant: Option<Uuid>,
        visited: &'a mut HashSet<String>,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                tracing::warn!(
                    subject_id = %subject.subject_id,
                    object_type,
                    object_id,
                    depth,
                    "graph traversal exceeded max_depth, denying (security event)"
                );
                return Ok(false);
            }

            let visit_key = format!(
                "{}:{}:{}:{}:{}",
                subject.subject_type,
                subject.subject_id,
                node.visit_token(),
                object_type,
                object_id
            );
            if !visited.insert(visit_key) {
                tracing::warn!(
                    subject_id = %subject.subject_id,
                    object_type,
                    object_id,
                    "cycle detected in graph traversal, denying"
                );
                return Ok(false);
            }

            match node {
                EvalNode::Name(name) => {
                    let namespace = self.namespaces.get(object_type).await?;
                    let Some(ns) = namespace else {
                        // No namespace registered: treat permission
                        // as a literal relation.
                        return self
                            .direct(subject, &name, object_type, object_id, context, tenant, visited, depth)
                            .await;
                    };

                    if let Some(candidates) = ns.config.permissions.get(&name) {
                        for candidate in candidates.clone() {
                            if self
                                .eval(
                                    subject,
                                    EvalNode::Expr(candidate, name.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                )
                                .await?
                            {
                                return Ok(true);
                            }
                        }
                        return Ok(false);
                    }

                    if let Some(expr) = ns.config.relations.get(&name).cloned() {
                        return self
                            .eval(
                                subject,
                                EvalNode::Expr(expr, name.clone()),
                                object_type,
                                object_id,
                                context,
                                tenant,
                                visited,
                                depth + 1,
                            )
                            .await;
                    }

                    // Neither a known permission nor relation: treat as a
                    // literal relation name against the tuple store.
                    self.direct(subject, &name, object_type, object_id, context, tenant, visited, depth)
                        .await
                }
                EvalNode::Expr(expr, current_relation) => match expr {
                    RewriteExpr::This => {
                        self.direct(subject, &current_relation, object_type, object_id, context, tenant, visited, depth)
                            .await
                    }
                    RewriteExpr::ComputedUserset(relation) => {
                        self.eval(
                            subject,
                            EvalNode::Name(relation),
                            object_type,
                            object_id,
                            context,
                            tenant,
                            visited,
                            depth + 1,
                        )
                        .await
                    }
                    RewriteExpr::Union(branches) => {
                        for branch in branches {
                            if self
                                .eval(
                                    subject,
                                    EvalNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                )
                                .await?
                            {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    RewriteExpr::Intersection(branches) => {
                        for branch in branches {
                            if !self
                                .eval(
                                    subject,
                                    EvalNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                )
                                .await?
                            {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    RewriteExpr::Exclusion(inner) => {
                        let allowed = self
                            .eval(
                                subject,
                                EvalNode::Expr(*inner, current_relation),
                                object_type,
                                object_id,
                                context,
                                tenant,
                                visited,
                                depth + 1,
                            )
                            .await?;
                        Ok(!allowed)
                    }
                    RewriteExpr::TupleToUserset(ttu) => {
                        let related = self
                            .tuples
                            .find_related_objects(object_type, object_id, &ttu.tupleset.relation)
                            .await?;

                        for tuple in related {
                            // The hierarchy hop stays within the same
                            // `object_type` (see DESIGN.md: the tuple
                            // model's `SubjectType` enum is fixed to
                            // user/application/group/userset, so
                            // cross-type parent edges like file->folder
                            // are represented as same-object_type
                            // ancestry keyed by `subject_id` rather than a
                            // distinct object type).
                            if self
                                .eval(
                                    subject,
                                    EvalNode::Name(ttu.computed_userset.relation.clone()),
                                    object_type,
                                    &tuple.subject_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                )
                                .await?
                            {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                },
            }
        })
    }

    /// The direct-relation base case. Consults (a) the
    /// concrete tuple, (b) the wildcard tuple, (c) any userset-as-subject
    /// tuple, recursing into the userset's own relation.
    fn direct<'a>(
        &'a self,
        subject: &'a SubjectRef,
        relation: &'a str,
        object_type: &'a str,
        object_id: &'a str,
        context: Option<&'a EvalContext>,
        tenant: Option<Uuid>,
        visited: &'a mut HashSet<String>,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if let Some(tuple) = self.tuples.find_direct(subject, relation, object_type, object_id).await? {
                if self.passes_abac(&tuple, context) {
                    return Ok(true);
                }
            }

            // The wildcard subject is not itself consulted when the check
            // is already for the wildcard, or `check(("*","*"), P, O)`
            // would recurse through its own grant (spec §9).
            if !subject.is_wildcard() {
                if let Some(tuple) = self.tuples.find_wildcard(relation, object_type, object_id).await? {
                    if self.passes_abac(&tuple, context) {
                        return Ok(true);
                    }
                }
            }

            let subject_sets = self
                .tuples
                .find_subject_sets(relation, object_type, object_id, tenant)
                .await?;

            for tuple in subject_sets {
                let Some(set_relation) = tuple.subject_relation.clone() else {
                    continue;
                };
                if !self.passes_abac(&tuple, context) {
                    continue;
                }
                let set_object_type = tuple.subject_type.to_string();
                if self
                    .eval(
                        subject,
                        EvalNode::Name(set_relation),
                        &set_object_type,
                        &tuple.subject_id,
                        context,
                        tenant,
                        visited,
                        depth + 1,
                    )
                    .await?
                {
                    return Ok(true);
                }
            }

            Ok(false)
        })
    }

    fn passes_abac(&self, tuple: &RelationTuple, context: Option<&EvalContext>) -> bool {
        match &tuple.conditions {
            None => nexus_abac::evaluate(None, context),
            Some(value) => match serde_json::from_value::<nexus_abac::Conditions>(value.clone()) {
                Ok(conditions) => nexus_abac::evaluate(Some(&conditions), context),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed ABAC conditions JSON, denying");
                    false
                }
            },
        }
    }

    pub fn namespaces(&self) -> &NamespaceRepository {
        &self.namespaces
    }

    pub fn tuples(&self) -> &TupleRepository {
        &self.tuples
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}

/// Convenience filter builder used by `expand` (module `expand.rs`) to list
/// every tuple on a given relation/object without the full check machinery.
pub(crate) fn direct_tuple_filter(relation: &str, object_type: &str, object_id: &str) -> TupleFilter {
    TupleFilter {
        relation: Some(relation.to_string()),
        object_type: Some(object_type.to_string()),
        object_id: Some(object_id.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_node_visit_token_distinguishes_name_from_expr() {
        let name = EvalNode::Name("viewer".to_string());
        let expr = EvalNode::Expr(RewriteExpr::This, "viewer".to_string());
        assert_ne!(name.visit_token(), expr.visit_token());
    }
}
