//! Decides access from explicit edges using the specificity rule.
//!
//! An edge's `access` map is scanned narrow to broad along the permission
//! family; edges on one resource are consulted most specific subject first;
//! a point check combines the decisions inherited through each parent of
//! the resource the same way the synthesized query filter does.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::authz::edges::{find_edges, EdgeQuery, PermissionEdge};
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::{HierarchyGraph, ParentLink};
use crate::authz::permission::PermissionType;
use crate::authz::store::EntityStore;
use crate::authz::types::Uid;
use crate::authz::AuthzState;

/// One edge's opinion and the permission key that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub permission: PermissionType,
}

/// Scan `family` narrow to broad. The first explicit allow wins at once; a
/// deny is only tentative until the whole family has been scanned.
pub fn access_for(access: &BTreeMap<String, bool>, family: &[PermissionType]) -> Option<AccessDecision> {
    let mut denied: Option<&PermissionType> = None;
    for permission in family {
        match access.get(&permission.to_string()) {
            Some(true) => {
                return Some(AccessDecision {
                    allowed: true,
                    permission: permission.clone(),
                })
            }
            Some(false) if denied.is_none() => denied = Some(permission),
            _ => {}
        }
    }
    denied.map(|permission| AccessDecision {
        allowed: false,
        permission: permission.clone(),
    })
}

/// First edge with an opinion, given edges already in subject order.
pub fn decide<'e>(
    edges: &[&'e PermissionEdge],
    family: &[PermissionType],
) -> Option<(&'e PermissionEdge, AccessDecision)> {
    edges
        .iter()
        .find_map(|edge| access_for(&edge.access, family).map(|decision| (*edge, decision)))
}

/// permission -> resource uid -> decision (`None` when no edge has an opinion)
pub type Resolution = BTreeMap<PermissionType, BTreeMap<Uid, Option<bool>>>;

/// Borrowed view over everything a resolution pass reads.
pub struct Resolver<'a> {
    pub state: &'a AuthzState,
    pub db: &'a DatabaseConnection,
    pub store: &'a dyn EntityStore,
}

impl<'a> Resolver<'a> {
    pub fn new(state: &'a AuthzState, db: &'a DatabaseConnection, store: &'a dyn EntityStore) -> Self {
        Self { state, db, store }
    }

    /// The subject's own uid followed by every subject-hierarchy ancestor,
    /// deepest collection first.
    pub async fn subject_hierarchy_ids(&self, subject: &Uid) -> Result<Vec<Uid>, AuthzError> {
        self.state.subject_collection(subject)?;
        let graph = &self.state.graph;
        let ancestors = self.lineage(subject, Role::Subject).await?;

        let mut ranked: Vec<(usize, Uid)> = Vec::with_capacity(ancestors.len());
        for uid in ancestors {
            let collection = graph.collection_of(&uid)?;
            ranked.push((graph.subject_depth(&collection.name), uid));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut ids = vec![subject.clone()];
        ids.extend(ranked.into_iter().map(|(_, uid)| uid));
        Ok(ids)
    }

    /// The resource's transitive resource-hierarchy ancestors, read through
    /// the entity store. Excludes the resource itself.
    pub async fn resource_ancestors(&self, resource: &Uid) -> Result<Vec<Uid>, AuthzError> {
        self.state.resource_collection(resource)?;
        self.lineage(resource, Role::Resource).await
    }

    /// Breadth-first walk over one role's parent links, excluding `start`.
    async fn lineage(&self, start: &Uid, role: Role) -> Result<Vec<Uid>, AuthzError> {
        let graph = &self.state.graph;
        let mut seen = BTreeSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            let collection = graph.collection_of(&current)?.name.clone();
            for link in role.parents(graph, &collection) {
                let ids = self
                    .store
                    .linked_ids(&collection, current.id(), &link.field)
                    .await?;
                for id in ids {
                    let uid = graph.uid(&link.collection, &id)?;
                    if seen.insert(uid.clone()) {
                        out.push(uid.clone());
                        queue.push_back(uid);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Per permission and resource: the decision of the most specific subject
    /// edge with an opinion, or `None`.
    pub async fn resolve(
        &self,
        subject: &Uid,
        permissions: &[PermissionType],
        resources: &[Uid],
    ) -> Result<Resolution, AuthzError> {
        let mut families = Vec::with_capacity(permissions.len());
        for permission in permissions {
            families.push((permission, self.state.catalog.family(permission)?));
        }

        let subject_ids = self.subject_hierarchy_ids(subject).await?;
        let keys: BTreeSet<&PermissionType> = families.iter().flat_map(|(_, f)| f.iter()).collect();
        let query = EdgeQuery::default()
            .subjects(subject_ids.iter().cloned())
            .resources(resources.iter().cloned())
            .permissions(keys);
        let edges = find_edges(self.db, &query).await?;

        tracing::debug!(
            %subject,
            subjects = subject_ids.len(),
            resources = resources.len(),
            edges = edges.len(),
            "Resolving access"
        );

        let by_resource = group_by_subject_rank(&edges, &subject_ids, |e| &e.resource_id);

        let mut resolution = Resolution::new();
        for (permission, family) in &families {
            let decisions = resolution.entry((*permission).clone()).or_default();
            for resource in resources {
                let decision = by_resource
                    .get(resource)
                    .and_then(|group| decide(group, family))
                    .map(|(_, d)| d.allowed);
                decisions.insert(resource.clone(), decision);
            }
        }
        Ok(resolution)
    }

    /// Point check over the resource and its ancestors, agreeing with the
    /// synthesized query filter. The resource's own decision wins. Otherwise
    /// each direct parent inherits from the deepest class of its own lineage
    /// holding an opinion, where an allow beats a deny. The resource is then
    /// allowed when some parent allows and every denying parent sits in a
    /// shallower class than an allowing one. No opinion at all denies.
    pub async fn check(
        &self,
        resource: &Uid,
        permissions: &[PermissionType],
        subject: &Uid,
    ) -> Result<BTreeMap<PermissionType, bool>, AuthzError> {
        let graph = &self.state.graph;
        let collection = self.state.resource_collection(resource)?.name.clone();

        let mut parents: Vec<Uid> = Vec::new();
        for link in graph.resource_parents(&collection) {
            for id in self.store.linked_ids(&collection, resource.id(), &link.field).await? {
                let uid = graph.uid(&link.collection, &id)?;
                if !parents.contains(&uid) {
                    parents.push(uid);
                }
            }
        }

        let mut uids = BTreeSet::from([resource.clone()]);
        let mut branches = Vec::with_capacity(parents.len());
        for parent in parents {
            let depth = graph.resource_depth(&graph.collection_of(&parent)?.name);
            let mut lineage = vec![parent.clone()];
            lineage.extend(self.lineage(&parent, Role::Resource).await?);
            let levels = by_depth(graph, &lineage)?;
            uids.extend(lineage);
            branches.push((depth, levels));
        }
        let uids: Vec<Uid> = uids.into_iter().collect();

        let resolution = self.resolve(subject, permissions, &uids).await?;

        let mut out = BTreeMap::new();
        for permission in permissions {
            let decisions = resolution.get(permission);
            let decision = |uid: &Uid| decisions.and_then(|d| d.get(uid)).copied().flatten();

            let allowed = match decision(resource) {
                Some(allowed) => allowed,
                None => {
                    let inherited: Vec<(usize, bool)> = branches
                        .iter()
                        .filter_map(|(depth, levels)| {
                            levels
                                .values()
                                .find_map(|level| {
                                    level.iter().filter_map(|uid| decision(uid)).reduce(|a, b| a || b)
                                })
                                .map(|allowed| (*depth, allowed))
                        })
                        .collect();
                    combine_parents(&inherited)
                }
            };
            out.insert(permission.clone(), allowed);
        }

        tracing::debug!(%resource, %subject, ?out, "Point check");
        Ok(out)
    }
}

/// Uids grouped by resource depth, deepest class first, uid order within.
fn by_depth(graph: &HierarchyGraph, uids: &[Uid]) -> Result<BTreeMap<Reverse<usize>, Vec<Uid>>, AuthzError> {
    let mut levels: BTreeMap<Reverse<usize>, Vec<Uid>> = BTreeMap::new();
    for uid in uids {
        let collection = graph.collection_of(uid)?;
        levels
            .entry(Reverse(graph.resource_depth(&collection.name)))
            .or_default()
            .push(uid.clone());
    }
    for level in levels.values_mut() {
        level.sort();
    }
    Ok(levels)
}

/// `(parent class depth, inherited decision)` per decided parent. A deny is
/// only outweighed by an allow on a parent of a deeper class.
fn combine_parents(inherited: &[(usize, bool)]) -> bool {
    let Some(deepest_allow) = inherited
        .iter()
        .filter(|(_, allowed)| *allowed)
        .map(|(depth, _)| *depth)
        .max()
    else {
        return false;
    };
    inherited
        .iter()
        .filter(|(_, allowed)| !*allowed)
        .all(|(depth, _)| deepest_allow > *depth)
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Resource,
    Subject,
}

impl Role {
    fn parents<'g>(self, graph: &'g HierarchyGraph, collection: &str) -> &'g [ParentLink] {
        match self {
            Role::Resource => graph.resource_parents(collection),
            Role::Subject => graph.subject_parents(collection),
        }
    }
}

/// Group edges by a key, each group ordered by the rank of its subject in
/// `subject_ids` (most specific first).
pub(crate) fn group_by_subject_rank<'e, K: Ord + Clone>(
    edges: &'e [PermissionEdge],
    subject_ids: &[Uid],
    key: impl Fn(&PermissionEdge) -> &K,
) -> BTreeMap<K, Vec<&'e PermissionEdge>> {
    let rank: HashMap<&Uid, usize> = subject_ids.iter().enumerate().map(|(i, u)| (u, i)).collect();
    let mut groups: BTreeMap<K, Vec<&PermissionEdge>> = BTreeMap::new();
    for edge in edges {
        groups.entry(key(edge).clone()).or_default().push(edge);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| (rank.get(&e.subject_id).copied().unwrap_or(usize::MAX), e.id));
    }
    groups
}
