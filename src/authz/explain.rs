//! Replays a query synthesis trace for one resource.

use serde::Serialize;

use crate::authz::errors::AuthzError;
use crate::authz::permission::PermissionType;
use crate::authz::query::{DebugGraph, DebugNode, Synthesis};
use crate::authz::resolver::Resolver;
use crate::authz::types::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationKind {
    Allow,
    Deny,
    Unset,
}

/// One chain from the resource to the entity holding a deciding edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub kind: ExplanationKind,
    /// resource first, entity holding the edge last
    pub uid_path: Vec<Uid>,
    pub permission_id: Option<i32>,
    pub permission_type: Option<PermissionType>,
    /// link field followed on the final hop
    pub property: Option<String>,
}

impl Explanation {
    pub fn unset() -> Self {
        Self {
            kind: ExplanationKind::Unset,
            uid_path: Vec::new(),
            permission_id: None,
            permission_type: None,
            property: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessExplanation {
    pub has_access: bool,
    pub explanations: Vec<Explanation>,
    pub resource_id: Uid,
    pub subject_id: Uid,
}

impl<'a> Resolver<'a> {
    /// Every recorded decision reachable from `resource`, most specific
    /// collection first. Falls back to a single `Unset` entry.
    pub async fn explain(
        &self,
        synthesis: &Synthesis,
        resource: &Uid,
    ) -> Result<Vec<Explanation>, AuthzError> {
        let graph = &self.state.graph;
        let trace = &synthesis.trace;
        let target = synthesis.target.as_str();

        // (rank, uid, allowed, field followed from the resource)
        let mut starts: Vec<(usize, Uid, bool, Option<String>)> = Vec::new();

        if let Some(allowed) = trace.decision(target, resource.id()) {
            starts.push((usize::MAX, resource.clone(), allowed, None));
        }

        for collection in trace.collections() {
            if collection == target {
                continue;
            }
            let Some(field) = graph.link_field(target, collection) else {
                continue;
            };
            let ids = self.store.linked_ids(target, resource.id(), field).await?;
            for id in ids {
                if let Some(allowed) = trace.decision(collection, &id) {
                    starts.push((
                        graph.resource_depth(collection),
                        graph.uid(collection, &id)?,
                        allowed,
                        Some(field.to_string()),
                    ));
                }
            }
        }
        starts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut explanations = Vec::new();
        for (_, start, allowed, field) in starts {
            let kind = if allowed {
                ExplanationKind::Allow
            } else {
                ExplanationKind::Deny
            };
            let mut prefix = vec![resource.clone()];
            if start != *resource {
                prefix.push(start.clone());
            }
            walk(&trace.graph, &start, prefix, field, kind, &mut explanations)?;
        }

        if explanations.is_empty() {
            explanations.push(Explanation::unset());
        }
        Ok(explanations)
    }
}

/// Follow parent pointers from `uid` to every leaf, emitting one explanation
/// per path.
fn walk(
    graph: &DebugGraph,
    uid: &Uid,
    path: Vec<Uid>,
    property: Option<String>,
    kind: ExplanationKind,
    out: &mut Vec<Explanation>,
) -> Result<(), AuthzError> {
    let node = graph
        .get(uid)
        .ok_or_else(|| AuthzError::StaleDebugGraph(uid.to_string()))?;

    match node {
        DebugNode::Leaf {
            permission_type,
            edge_id,
            ..
        } => out.push(Explanation {
            kind,
            uid_path: path,
            permission_id: Some(*edge_id),
            permission_type: Some(permission_type.clone()),
            property,
        }),
        DebugNode::Internal {
            parents, property: field, ..
        } => {
            for parent in parents {
                let mut next = path.clone();
                next.push(parent.clone());
                walk(graph, parent, next, Some(field.clone()), kind, out)?;
            }
        }
    }
    Ok(())
}
