//! Translates a subject's edges into one filter over a target collection.
//!
//! Edges are gathered for the target and its resource ancestors and processed
//! deepest collection first. Each decided entity claims its uid in the
//! `already` set, so a more specific decision is never overwritten by a
//! broader one stepped down from an ancestor. Every recorded id leaves a node
//! in the [`DebugGraph`] so the decision can be explained afterwards.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::authz::edges::{find_edges, EdgeQuery, PermissionEdge};
use crate::authz::errors::AuthzError;
use crate::authz::filter::{Filter, QueryRestriction};
use crate::authz::permission::PermissionType;
use crate::authz::resolver::{decide, group_by_subject_rank, Resolver};
use crate::authz::types::Uid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebugNode {
    /// Entity holding the edge that decided it
    Leaf {
        collection: String,
        permission_type: PermissionType,
        edge_id: i32,
    },
    /// Entity that inherited its decision through `property`
    Internal {
        collection: String,
        parents: Vec<Uid>,
        property: String,
    },
}

/// Arena of trace nodes keyed by uid. The first node recorded for a uid is
/// kept; internal nodes only accumulate parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebugGraph {
    nodes: BTreeMap<Uid, DebugNode>,
}

impl DebugGraph {
    pub fn get(&self, uid: &Uid) -> Option<&DebugNode> {
        self.nodes.get(uid)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.nodes.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn leaf(&mut self, uid: Uid, collection: &str, permission_type: &PermissionType, edge_id: i32) {
        self.nodes.entry(uid).or_insert_with(|| DebugNode::Leaf {
            collection: collection.to_string(),
            permission_type: permission_type.clone(),
            edge_id,
        });
    }

    pub(crate) fn internal(&mut self, uid: Uid, collection: &str, parent: Uid, property: &str) {
        let node = self.nodes.entry(uid).or_insert_with(|| DebugNode::Internal {
            collection: collection.to_string(),
            parents: Vec::new(),
            property: property.to_string(),
        });
        if let DebugNode::Internal { parents, .. } = node {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
    }
}

/// Scratch state of one synthesis pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    /// collection -> raw ids granted
    pub positive: BTreeMap<String, BTreeSet<String>>,
    /// collection -> raw ids denied
    pub negative: BTreeMap<String, BTreeSet<String>>,
    pub graph: DebugGraph,
    #[serde(skip)]
    already: BTreeSet<Uid>,
}

impl Trace {
    /// Record a decision unless the uid was already decided. Returns whether
    /// it was recorded.
    fn record(&mut self, uid: Uid, collection: &str, allowed: bool) -> bool {
        if !self.already.insert(uid.clone()) {
            return false;
        }
        let side = if allowed {
            &mut self.positive
        } else {
            &mut self.negative
        };
        side.entry(collection.to_string())
            .or_default()
            .insert(uid.id().to_string());
        true
    }

    /// `Some(true)` when the id was recorded as granted, `Some(false)` when
    /// denied.
    pub fn decision(&self, collection: &str, id: &str) -> Option<bool> {
        if self.positive.get(collection).is_some_and(|ids| ids.contains(id)) {
            Some(true)
        } else if self.negative.get(collection).is_some_and(|ids| ids.contains(id)) {
            Some(false)
        } else {
            None
        }
    }

    /// Collections holding at least one recorded id.
    pub fn collections(&self) -> BTreeSet<&str> {
        self.positive
            .keys()
            .chain(self.negative.keys())
            .map(|c| c.as_str())
            .collect()
    }
}

/// Result of synthesizing a query, with the trace that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Synthesis {
    pub target: String,
    pub permission: PermissionType,
    pub restriction: QueryRestriction,
    pub trace: Trace,
}

impl Synthesis {
    fn finish(target: &str, permission: PermissionType, restriction: QueryRestriction, trace: Trace) -> Self {
        Self {
            target: target.to_string(),
            permission,
            restriction,
            trace,
        }
    }
}

/// A decided entity of one group.
struct Decided<'e> {
    uid: Uid,
    allowed: bool,
    edge: &'e PermissionEdge,
    permission: PermissionType,
}

impl<'a> Resolver<'a> {
    /// Restrict `target` to the documents `subject` holds `permission` on.
    pub async fn synthesize(
        &self,
        subject: Option<&Uid>,
        permission: &str,
        target: &str,
    ) -> Result<Synthesis, AuthzError> {
        let graph = &self.state.graph;
        let catalog = &self.state.catalog;

        let is_resource = graph.is_resource(target);
        let permission = if is_resource {
            catalog.canonical(permission, target)?
        } else {
            catalog.parse(permission)?
        };
        let mut trace = Trace::default();

        let Some(subject) = subject else {
            return Ok(Synthesis::finish(target, permission, QueryRestriction::Deny, trace));
        };

        if !is_resource {
            tracing::warn!(
                collection = target,
                %permission,
                "Query on a collection outside the resource hierarchy is unrestricted"
            );
            return Ok(Synthesis::finish(
                target,
                permission,
                QueryRestriction::Unrestricted,
                trace,
            ));
        }

        let family = catalog.family(&permission)?;
        let mut classes = vec![target.to_string()];
        classes.extend(graph.resource_ancestors(target));

        let subject_ids = self.subject_hierarchy_ids(subject).await?;
        let query = EdgeQuery::default()
            .subjects(subject_ids.iter().cloned())
            .resource_types(classes.iter().cloned())
            .permissions(&family);
        let edges = find_edges(self.db, &query).await?;

        if edges.is_empty() {
            tracing::debug!(%subject, %permission, target, "No matching edges");
            return Ok(Synthesis::finish(target, permission, QueryRestriction::Deny, trace));
        }

        let mut groups: BTreeMap<&str, Vec<PermissionEdge>> = BTreeMap::new();
        for edge in &edges {
            groups
                .entry(edge.resource_type.as_str())
                .or_default()
                .push(edge.clone());
        }
        let mut order: Vec<&str> = groups.keys().copied().collect();
        order.sort_by(|a, b| {
            graph
                .resource_depth(b)
                .cmp(&graph.resource_depth(a))
                .then_with(|| a.cmp(b))
        });

        for collection in order {
            let decided = collapse(&groups[collection], &subject_ids, &family);
            tracing::debug!(
                collection,
                decided = decided.len(),
                "Processing edge group"
            );

            if collection == target || graph.link_field(target, collection).is_some() {
                for d in decided {
                    if trace.record(d.uid.clone(), collection, d.allowed) {
                        trace.graph.leaf(d.uid, collection, &d.permission, d.edge.id);
                    }
                }
            } else {
                self.step_group(target, collection, decided, &mut trace).await?;
            }
        }

        let restriction = self.restriction(target, &trace)?;
        tracing::debug!(%subject, %permission, target, ?restriction, "Synthesized query");
        Ok(Synthesis::finish(target, permission, restriction, trace))
    }

    /// Carry a distant group's decisions down the link path to the
    /// collection the target links to directly, then record them there.
    async fn step_group(
        &self,
        target: &str,
        collection: &str,
        decided: Vec<Decided<'_>>,
        trace: &mut Trace,
    ) -> Result<(), AuthzError> {
        let graph = &self.state.graph;
        let path = graph.path(target, collection)?.to_vec();

        let mut positive = BTreeSet::new();
        let mut negative = BTreeSet::new();
        for d in decided {
            if d.allowed {
                positive.insert(d.uid.id().to_string());
            } else {
                negative.insert(d.uid.id().to_string());
            }
            trace.graph.leaf(d.uid, collection, &d.permission, d.edge.id);
        }

        for hop in (2..path.len()).rev() {
            let child = &path[hop - 1];
            let parent = &path[hop];
            let field = graph.link_field(child, parent).ok_or_else(|| AuthzError::NoPath {
                from: child.clone(),
                to: parent.clone(),
            })?;

            positive = self.step(child, parent, field, &positive, trace).await?;
            negative = self.step(child, parent, field, &negative, trace).await?;
        }

        let direct = &path[1];
        for id in positive {
            trace.record(graph.uid(direct, &id)?, direct, true);
        }
        for id in negative {
            trace.record(graph.uid(direct, &id)?, direct, false);
        }
        Ok(())
    }

    /// One hop: ids of `child` entities whose `field` references `ids`.
    async fn step(
        &self,
        child: &str,
        parent: &str,
        field: &str,
        ids: &BTreeSet<String>,
        trace: &mut Trace,
    ) -> Result<BTreeSet<String>, AuthzError> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let graph = &self.state.graph;
        let links = self.store.find_links(child, field, ids).await?;

        let mut stepped = BTreeSet::new();
        for (child_id, parent_id) in links {
            let child_uid = graph.uid(child, &child_id)?;
            let parent_uid = graph.uid(parent, &parent_id)?;
            trace.graph.internal(child_uid, child, parent_uid, field);
            stepped.insert(child_id);
        }
        tracing::debug!(child, parent, from = ids.len(), to = stepped.len(), "Stepped ids");
        Ok(stepped)
    }

    /// Build the filter from the recorded positive and negative ids.
    fn restriction(&self, target: &str, trace: &Trace) -> Result<QueryRestriction, AuthzError> {
        let graph = &self.state.graph;
        let field_for = |collection: &str| -> Result<String, AuthzError> {
            if collection == target {
                return Ok(graph.collection(target)?.primary_key.clone());
            }
            graph
                .link_field(target, collection)
                .map(|f| f.to_string())
                .ok_or_else(|| AuthzError::NoPath {
                    from: target.to_string(),
                    to: collection.to_string(),
                })
        };
        // the target itself is the most specific collection
        let rank = |collection: &str| {
            if collection == target {
                usize::MAX
            } else {
                graph.resource_depth(collection)
            }
        };

        let positive: Vec<(&str, &BTreeSet<String>)> = trace
            .positive
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(c, ids)| (c.as_str(), ids))
            .collect();
        let negative: Vec<(&str, &BTreeSet<String>)> = trace
            .negative
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(c, ids)| (c.as_str(), ids))
            .collect();

        if positive.is_empty() {
            return Ok(QueryRestriction::Deny);
        }

        let mut grants = Vec::with_capacity(positive.len());
        for (collection, ids) in &positive {
            grants.push(Filter::is_in(&field_for(*collection)?, ids.iter().cloned()));
        }
        let positive_restriction = Filter::or(grants);

        if negative.is_empty() {
            return Ok(QueryRestriction::Filter(positive_restriction));
        }

        let mut clauses = Vec::with_capacity(negative.len() + 1);
        for (collection, ids) in &negative {
            let mut either = vec![Filter::not_in(&field_for(*collection)?, ids.iter().cloned())];
            for (deeper, granted) in positive.iter().filter(|(p, _)| rank(*p) > rank(*collection)) {
                either.push(Filter::is_in(&field_for(*deeper)?, granted.iter().cloned()));
            }
            clauses.push(Filter::or(either));
        }
        clauses.push(positive_restriction);

        Ok(QueryRestriction::Filter(Filter::and(clauses)))
    }
}

/// One decision per resource id, most specific subject edge first.
fn collapse<'e>(
    edges: &'e [PermissionEdge],
    subject_ids: &[Uid],
    family: &[PermissionType],
) -> Vec<Decided<'e>> {
    group_by_subject_rank(edges, subject_ids, |e| &e.resource_id)
        .into_iter()
        .filter_map(|(uid, group)| {
            decide(&group, family).map(|(edge, decision)| Decided {
                uid,
                allowed: decision.allowed,
                edge,
                permission: decision.permission,
            })
        })
        .collect()
}
