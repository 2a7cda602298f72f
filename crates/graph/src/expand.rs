//! `expand(permission, object) → [subject]`: returns every subject with
//! that permission on that object, recursively resolving usersets and
//! `tupleToUserset`. `exclusion` can't cheaply enumerate "who does NOT have
//! X", so expand logs a warning and skips it rather than guessing.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use nexus_models::{RewriteExpr, SubjectRef};

use crate::error::Result;
use crate::evaluator::{direct_tuple_filter, GraphEvaluator};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
enum ExpandNode {
    Name(String),
    Expr(RewriteExpr, String),
}

impl GraphEvaluator {
    pub async fn expand(&self, permission: &str, object_type: &str, object_id: &str) -> Result<Vec<SubjectRef>> {
        let mut fanout = 0usize;
        let mut seen = HashSet::new();
        let subjects = self
            .expand_node(
                ExpandNode::Name(permission.to_string()),
                object_type,
                object_id,
                &mut fanout,
                &mut seen,
            )
            .await?;
        Ok(subjects.into_iter().collect())
    }

    fn expand_node<'a>(
        &'a self,
        node: ExpandNode,
        object_type: &'a str,
        object_id: &'a str,
        fanout: &'a mut usize,
        seen_objects: &'a mut HashSet<(String, String)>,
    ) -> BoxFuture<'a, Result<HashSet<SubjectRef>>> {
        Box::pin(async move {
            if !seen_objects.insert((object_type.to_string(), object_id.to_string())) {
                return Ok(HashSet::new());
            }
            *fanout += 1;
            if *fanout > self.config().max_expand_fanout {
                tracing::warn!(object_type, object_id, "expand exceeded max_expand_fanout, truncating");
                return Ok(HashSet::new());
            }

            match node {
                ExpandNode::Name(name) => {
                    let namespace = self.namespaces().get(object_type).await?;
                    let Some(ns) = namespace else {
                        return self.expand_relation(&name, object_type, object_id, fanout, seen_objects).await;
                    };

                    if let Some(candidates) = ns.config.permissions.get(&name).cloned() {
                        let mut out = HashSet::new();
                        for expr in candidates {
                            out.extend(
                                self.expand_node(
                                    ExpandNode::Expr(expr, name.clone()),
                                    object_type,
                                    object_id,
                                    fanout,
                                    seen_objects,
                                )
                                .await?,
                            );
                        }
                        return Ok(out);
                    }

                    if let Some(expr) = ns.config.relations.get(&name).cloned() {
                        return self
                            .expand_node(
                                ExpandNode::Expr(expr, name.clone()),
                                object_type,
                                object_id,
                                fanout,
                                seen_objects,
                            )
                            .await;
                    }

                    self.expand_relation(&name, object_type, object_id, fanout, seen_objects).await
                }
                ExpandNode::Expr(expr, current_relation) => match expr {
                    RewriteExpr::This => {
                        self.expand_relation(&current_relation, object_type, object_id, fanout, seen_objects)
                            .await
                    }
                    RewriteExpr::ComputedUserset(relation) => {
                        self.expand_node(ExpandNode::Name(relation), object_type, object_id, fanout, seen_objects)
                            .await
                    }
                    RewriteExpr::Union(branches) => {
                        let mut out = HashSet::new();
                        for branch in branches {
                            out.extend(
                                self.expand_node(
                                    ExpandNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    fanout,
                                    seen_objects,
                                )
                                .await?,
                            );
                        }
                        Ok(out)
                    }
                    RewriteExpr::Intersection(branches) => {
                        let mut iter = branches.into_iter();
                        let Some(first) = iter.next() else {
                            return Ok(HashSet::new());
                        };
                        let mut out = self
                            .expand_node(
                                ExpandNode::Expr(first, current_relation.clone()),
                                object_type,
                                object_id,
                                fanout,
                                seen_objects,
                            )
                            .await?;
                        for branch in iter {
                            let next = self
                                .expand_node(
                                    ExpandNode::Expr(branch, current_relation.clone()),
                                    object_type,
                                    object_id,
                                    fanout,
                                    seen_objects,
                                )
                                .await?;
                            out.retain(|s| next.contains(s));
                        }
                        Ok(out)
                    }
                    RewriteExpr::Exclusion(_) => {
                        tracing::warn!(object_type, object_id, "exclusion not supported in expand, skipping branch");
                        Ok(HashSet::new())
                    }
                    RewriteExpr::TupleToUserset(ttu) => {
                        let related = self
                            .tuples()
                            .find_related_objects(object_type, object_id, &ttu.tupleset.relation)
                            .await?;
                        let mut out = HashSet::new();
                        for tuple in related {
                            out.extend(
                                self.expand_node(
                                    ExpandNode::Name(ttu.computed_userset.relation.clone()),
                                    object_type,
                                    &tuple.subject_id,
                                    fanout,
                                    seen_objects,
                                )
                                .await?,
                            );
                        }
                        Ok(out)
                    }
                },
            }
        })
    }

    /// Leaf case: every direct tuple on `relation`/object, plus recursive
    /// resolution of userset-as-subject tuples.
    async fn expand_relation(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
        fanout: &mut usize,
        seen_objects: &mut HashSet<(String, String)>,
    ) -> Result<HashSet<SubjectRef>> {
        let filter = direct_tuple_filter(relation, object_type, object_id);
        let tuples = self.tuples().list(filter).await?;

        let mut out = HashSet::new();
        for tuple in tuples {
            match &tuple.subject_relation {
                Some(set_relation) => {
                    let set_object_type = tuple.subject_type.to_string();
                    out.extend(
                        self.expand_node(
                            ExpandNode::Name(set_relation.clone()),
                            &set_object_type,
                            &tuple.subject_id,
                            fanout,
                            seen_objects,
                        )
                        .await?,
                    );
                }
                None => {
                    out.insert(tuple.subject());
                }
            }
        }
        Ok(out)
    }
}
