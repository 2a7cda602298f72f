//! `explain(subject, permission, object) → {result, cached, reason, paths,
//! successful_path}`: traces every branch taken with the same algorithm as
//! `check`, returning a structured DAG of visited nodes, expansions, and
//! the first path that succeeded (if any). Used for audit/debug only; must
//! never influence caching.
//!
//! This walks the identical rewrite algebra as `check` but records every
//! node visited into a flat trace rather than returning early on the first
//! success, so the caller can see every branch that was tried. `cached` is
//! always `false` here — caching is a concern of `nexus-engine`, which
//! layers L1/L2/Tiger lookups in front of this and sets that field itself
//! when it serves a cached answer instead of invoking this evaluator.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use nexus_abac::EvalContext;
use nexus_models::namespace::canonicalize;
use nexus_models::{RewriteExpr, SubjectRef};

use crate::error::Result;
use crate::evaluator::GraphEvaluator;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct ExplainStep {
    pub node: String,
    pub object_type: String,
    pub object_id: String,
    pub result: bool,
}

#[derive(Debug, Clone)]
pub struct ExplainResult {
    pub result: bool,
    pub cached: bool,
    pub reason: String,
    pub paths: Vec<ExplainStep>,
    pub successful_path: Option<Vec<ExplainStep>>,
}

#[derive(Debug, Clone)]
enum ExplainNode {
    Name(String),
    Expr(RewriteExpr, String),
}

impl ExplainNode {
    fn label(&self) -> String {
        match self {
            ExplainNode::Name(name) => name.clone(),
            ExplainNode::Expr(expr, relation) => format!("{relation}::{}", canonicalize(expr)),
        }
    }
}

impl GraphEvaluator {
    pub async fn explain(
        &self,
        subject: &SubjectRef,
        permission: &str,
        object_type: &str,
        object_id: &str,
        context: Option<&EvalContext>,
        tenant: Option<Uuid>,
    ) -> Result<ExplainResult> {
        let mut visited = HashSet::new();
        let mut trail = Vec::new();
        let mut current_path = Vec::new();

        let result = self
            .explain_node(
                subject,
                ExplainNode::Name(permission.to_string()),
                object_type,
                object_id,
                context,
                tenant,
                &mut visited,
                0,
                &mut trail,
                &mut current_path,
            )
            .await?;

        let successful_path = result.then(|| current_path.clone());
        let reason = if result {
            "at least one branch evaluated true".to_string()
        } else {
            "no branch evaluated true, or depth/cycle limit reached".to_string()
        };

        Ok(ExplainResult {
            result,
            cached: false,
            reason,
            paths: trail,
            successful_path,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn explain_node<'a>(
        &'a self,
        subject: &'a SubjectRef,
        node: ExplainNode,
        object_type: &'a str,
        object_id: &'a str,
        context: Option<&'a EvalContext>,
        tenant: Option<Uuid>,
        visited: &'a mut HashSet<String>,
        depth: usize,
        trail: &'a mut Vec<ExplainStep>,
        current_path: &'a mut Vec<ExplainStep>,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let label = node.label();

            if depth > self.config().max_depth {
                let step = ExplainStep {
                    node: format!("{label} [max_depth exceeded]"),
                    object_type: object_type.to_string(),
                    object_id: object_id.to_string(),
                    result: false,
                };
                trail.push(step);
                return Ok(false);
            }

            let visit_key = format!(
                "{}:{}:{}:{}:{}",
                subject.subject_type, subject.subject_id, label, object_type, object_id
            );
            if !visited.insert(visit_key) {
                trail.push(ExplainStep {
                    node: format!("{label} [cycle]"),
                    object_type: object_type.to_string(),
                    object_id: object_id.to_string(),
                    result: false,
                });
                return Ok(false);
            }

            // Delegate the actual evaluation to `check`'s underlying logic
            // on the subtree rooted at `node` by reusing the permission/
            // relation resolution already implemented there, scoped to a
            // single-level base case here and recursing through
            // `explain_node` itself for composite nodes.
            let result = match &node {
                ExplainNode::Name(name) => {
                    let namespace = self.namespaces().get(object_type).await?;
                    match namespace {
                        None => self.check(subject, name, object_type, object_id, context, tenant).await?,
                        Some(ns) => {
                            if let Some(candidates) = ns.config.permissions.get(name).cloned() {
                                let mut any = false;
                                for candidate in candidates {
                                    let branch = self
                                        .explain_node(
                                            subject,
                                            ExplainNode::Expr(candidate, name.clone()),
                                            object_type,
                                            object_id,
                                            context,
                                            tenant,
                                            visited,
                                            depth + 1,
                                            trail,
                                            current_path,
                                        )
                                        .await?;
                                    any = any || branch;
                                }
                                any
                            } else if let Some(expr) = ns.config.relations.get(name).cloned() {
                                self.explain_node(
                                    subject,
                                    ExplainNode::Expr(expr, name.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                    trail,
                                    current_path,
                                )
                                .await?
                            } else {
                                self.check(subject, name, object_type, object_id, context, tenant).await?
                            }
                        }
                    }
                }
                ExplainNode::Expr(expr, current_relation) => match expr {
                    RewriteExpr::This => {
                        self.check(subject, current_relation, object_type, object_id, context, tenant)
                            .await?
                    }
                    RewriteExpr::ComputedUserset(relation) => {
                        self.explain_node(
                            subject,
                            ExplainNode::Name(relation.clone()),
                            object_type,
                            object_id,
                            context,
                            tenant,
                            visited,
                            depth + 1,
                            trail,
                            current_path,
                        )
                        .await?
                    }
                    RewriteExpr::Union(branches) => {
                        let mut any = false;
                        for branch in branches.clone() {
                            let r = self
                                .explain_node(
                                    subject,
                                    ExplainNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                    trail,
                                    current_path,
                                )
                                .await?;
                            any = any || r;
                        }
                        any
                    }
                    RewriteExpr::Intersection(branches) => {
                        let mut all = true;
                        for branch in branches.clone() {
                            let r = self
                                .explain_node(
                                    subject,
                                    ExplainNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                    trail,
                                    current_path,
                                )
                                .await?;
                            all = all && r;
                        }
                        all
                    }
                    RewriteExpr::Exclusion(inner) => {
                        !self
                            .explain_node(
                                subject,
                                ExplainNode::Expr((**inner).clone(), current_relation.clone()),
                                object_type,
                                object_id,
                                context,
                                tenant,
                                visited,
                                depth + 1,
                                trail,
                                current_path,
                            )
                            .await?
                    }
                    RewriteExpr::TupleToUserset(ttu) => {
                        let related = self
                            .tuples()
                            .find_related_objects(object_type, object_id, &ttu.tupleset.relation)
                            .await?;
                        let mut any = false;
                        for tuple in related {
                            let r = self
                                .explain_node(
                                    subject,
                                    ExplainNode::Name(ttu.computed_userset.relation.clone()),
                                    object_type,
                                    &tuple.subject_id,
                                    context,
                                    tenant,
                                    visited,
                                    depth + 1,
                                    trail,
                                    current_path,
                                )
                                .await?;
                            any = any || r;
                        }
                        any
                    }
                },
            };

            let step = ExplainStep {
                node: label,
                object_type: object_type.to_string(),
                object_id: object_id.to_string(),
                result,
            };
            if result {
                current_path.push(step.clone());
            }
            trail.push(step);

            Ok(result)
        })
    }
}
