//! Static hierarchy of entity collections.
//!
//! Built once from the schema's link metadata. Two sub-hierarchies are kept:
//! resources (what is accessed) and subjects (who accesses). A collection may
//! sit in both. Parent links (`parent=#true`) form the ownership edges; every
//! link field, parent or not, is usable for path stepping between collections.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::authz::errors::AuthzError;
use crate::authz::types::{CollectionDef, LinkDef, Uid};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParentLink {
    /// Field on the child collection holding the parent id(s)
    pub field: String,
    pub collection: String,
}

/// One role's ownership DAG.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hierarchy {
    parents: BTreeMap<String, Vec<ParentLink>>,
    children: BTreeMap<String, BTreeSet<String>>,
    depth: BTreeMap<String, usize>,
}

impl Hierarchy {
    fn build(
        kind: &'static str,
        collections: &BTreeMap<String, CollectionDef>,
        member: impl Fn(&CollectionDef) -> bool,
    ) -> Result<Self, AuthzError> {
        let mut parents: BTreeMap<String, Vec<ParentLink>> = BTreeMap::new();
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for def in collections.values().filter(|c| member(c)) {
            let mut links: Vec<ParentLink> = def
                .links
                .iter()
                .filter(|l| l.parent)
                .filter(|l| collections.get(&l.to).map(&member).unwrap_or(false))
                .map(|l| ParentLink {
                    field: l.field.clone(),
                    collection: l.to.clone(),
                })
                .collect();
            links.sort();
            links.dedup();

            for link in &links {
                children
                    .entry(link.collection.clone())
                    .or_default()
                    .insert(def.name.clone());
            }
            parents.insert(def.name.clone(), links);
        }

        check_cycles(kind, &parents)?;

        let mut depth = BTreeMap::new();
        for name in parents.keys() {
            longest_path_to_root(name, &parents, &mut depth);
        }

        Ok(Self {
            parents,
            children,
            depth,
        })
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.parents.contains_key(collection)
    }

    pub fn depth(&self, collection: &str) -> Option<usize> {
        self.depth.get(collection).copied()
    }

    pub fn parents(&self, collection: &str) -> &[ParentLink] {
        self.parents
            .get(collection)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn children(&self, collection: &str) -> impl Iterator<Item = &str> {
        self.children
            .get(collection)
            .into_iter()
            .flat_map(|c| c.iter().map(|s| s.as_str()))
    }

    /// All transitive parents, nearest first (name order within one level).
    pub fn ancestors(&self, collection: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut level: BTreeSet<String> = self
            .parents(collection)
            .iter()
            .map(|p| p.collection.clone())
            .collect();

        while !level.is_empty() {
            let mut next = BTreeSet::new();
            for name in level {
                if !seen.insert(name.clone()) {
                    continue;
                }
                next.extend(self.parents(&name).iter().map(|p| p.collection.clone()));
                out.push(name);
            }
            level = next;
        }
        out
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.parents.keys().map(|s| s.as_str())
    }
}

fn check_cycles(
    kind: &'static str,
    parents: &BTreeMap<String, Vec<ParentLink>>,
) -> Result<(), AuthzError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    for name in parents.keys() {
        if !visited.contains(name.as_str()) {
            dfs_cycle_check(kind, name, parents, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    kind: &'static str,
    name: &str,
    parents: &BTreeMap<String, Vec<ParentLink>>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
) -> Result<(), AuthzError> {
    visited.insert(name.to_string());
    in_stack.insert(name.to_string());

    for parent in parents.get(name).into_iter().flatten() {
        if in_stack.contains(parent.collection.as_str()) {
            return Err(AuthzError::CyclicHierarchy {
                hierarchy: kind,
                cycle: format!("{name} -> {}", parent.collection),
            });
        }
        if !visited.contains(parent.collection.as_str()) {
            dfs_cycle_check(kind, &parent.collection, parents, visited, in_stack)?;
        }
    }

    in_stack.remove(name);
    Ok(())
}

fn longest_path_to_root(
    name: &str,
    parents: &BTreeMap<String, Vec<ParentLink>>,
    memo: &mut BTreeMap<String, usize>,
) -> usize {
    if let Some(d) = memo.get(name) {
        return *d;
    }
    let d = parents
        .get(name)
        .into_iter()
        .flatten()
        .map(|p| 1 + longest_path_to_root(&p.collection, parents, memo))
        .max()
        .unwrap_or(0);
    memo.insert(name.to_string(), d);
    d
}

/// Immutable graph of every collection the schema declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyGraph {
    collections: BTreeMap<String, CollectionDef>,
    codes: BTreeMap<String, String>,
    resources: Hierarchy,
    subjects: Hierarchy,
    /// (from, to) -> shortest link path, both ends included
    paths: BTreeMap<(String, String), Vec<String>>,
}

impl HierarchyGraph {
    pub fn build(defs: Vec<CollectionDef>) -> Result<Self, AuthzError> {
        let mut collections: BTreeMap<String, CollectionDef> = BTreeMap::new();
        for def in defs {
            if collections.contains_key(&def.name) {
                return Err(AuthzError::InvalidSchema(format!(
                    "collection `{}` is declared more than once",
                    def.name
                )));
            }
            collections.insert(def.name.clone(), def);
        }

        let mut codes = BTreeMap::new();
        for def in collections.values() {
            if let Some(existing) = codes.insert(def.code.clone(), def.name.clone()) {
                return Err(AuthzError::InvalidSchema(format!(
                    "collections `{existing}` and `{}` share the uid code `{}`",
                    def.name, def.code
                )));
            }
            for link in &def.links {
                if !collections.contains_key(&link.to) {
                    return Err(AuthzError::InvalidSchema(format!(
                        "link `{}` in collection `{}` points to undefined collection `{}`",
                        link.field, def.name, link.to
                    )));
                }
            }
        }

        let resources = Hierarchy::build("resource", &collections, |c| c.resource)?;
        let subjects = Hierarchy::build("subject", &collections, |c| c.subject)?;
        let paths = shortest_paths(&collections);

        Ok(Self {
            collections,
            codes,
            resources,
            subjects,
            paths,
        })
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionDef, AuthzError> {
        self.collections
            .get(name)
            .ok_or_else(|| AuthzError::UnknownCollection(name.to_string()))
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionDef> {
        self.collections.values()
    }

    pub fn is_resource(&self, name: &str) -> bool {
        self.resources.contains(name)
    }

    pub fn is_subject(&self, name: &str) -> bool {
        self.subjects.contains(name)
    }

    pub fn resources(&self) -> &Hierarchy {
        &self.resources
    }

    pub fn subjects(&self) -> &Hierarchy {
        &self.subjects
    }

    pub fn resource_depth(&self, name: &str) -> usize {
        self.resources.depth(name).unwrap_or(0)
    }

    pub fn subject_depth(&self, name: &str) -> usize {
        self.subjects.depth(name).unwrap_or(0)
    }

    pub fn resource_ancestors(&self, name: &str) -> Vec<String> {
        self.resources.ancestors(name)
    }

    pub fn resource_parents(&self, name: &str) -> &[ParentLink] {
        self.resources.parents(name)
    }

    pub fn subject_parents(&self, name: &str) -> &[ParentLink] {
        self.subjects.parents(name)
    }

    pub fn collection_for_code(&self, code: &str) -> Option<&CollectionDef> {
        self.codes.get(code).and_then(|name| self.collections.get(name))
    }

    /// Build the uid of an entity of `collection`.
    pub fn uid(&self, collection: &str, id: &str) -> Result<Uid, AuthzError> {
        Ok(Uid::new(&self.collection(collection)?.code, id))
    }

    /// Resolve a uid to the collection it belongs to.
    pub fn collection_of(&self, uid: &Uid) -> Result<&CollectionDef, AuthzError> {
        self.collection_for_code(uid.code())
            .ok_or_else(|| AuthzError::InvalidUid(uid.to_string()))
    }

    /// Parse a uid string into `(collection, id)`.
    pub fn parse_uid(&self, s: &str) -> Result<(String, String), AuthzError> {
        let uid = Uid::parse(s).ok_or_else(|| AuthzError::InvalidUid(s.to_string()))?;
        let def = self.collection_of(&uid)?;
        Ok((def.name.clone(), uid.id().to_string()))
    }

    /// Field on `from` that references `to`, preferring parent links.
    pub fn link_field(&self, from: &str, to: &str) -> Option<&str> {
        let def = self.collections.get(from)?;
        preferred_link(def, to).map(|l| l.field.as_str())
    }

    /// Shortest link path from `from` to `to`, both included.
    pub fn path(&self, from: &str, to: &str) -> Result<&[String], AuthzError> {
        self.paths
            .get(&(from.to_string(), to.to_string()))
            .map(|p| p.as_slice())
            .ok_or_else(|| AuthzError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

fn preferred_link<'a>(def: &'a CollectionDef, to: &str) -> Option<&'a LinkDef> {
    def.links
        .iter()
        .filter(|l| l.to == to)
        .min_by(|a, b| b.parent.cmp(&a.parent).then_with(|| a.field.cmp(&b.field)))
}

/// Breadth-first search from every collection over link fields. Neighbours
/// are visited in name order so equal-length paths always resolve the same way.
fn shortest_paths(
    collections: &BTreeMap<String, CollectionDef>,
) -> BTreeMap<(String, String), Vec<String>> {
    let neighbours: HashMap<&str, BTreeSet<&str>> = collections
        .values()
        .map(|c| {
            (
                c.name.as_str(),
                c.links.iter().map(|l| l.to.as_str()).collect(),
            )
        })
        .collect();

    let mut paths = BTreeMap::new();
    for start in collections.keys() {
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([start.as_str()]);
        let mut seen = HashSet::from([start.as_str()]);

        while let Some(current) = queue.pop_front() {
            for &next in neighbours.get(current).into_iter().flatten() {
                if seen.insert(next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        for end in seen {
            let mut path = vec![end.to_string()];
            let mut cursor = end;
            while let Some(&prev) = previous.get(cursor) {
                path.push(prev.to_string());
                cursor = prev;
            }
            path.reverse();
            paths.insert((start.clone(), end.to_string()), path);
        }
    }
    paths
}
