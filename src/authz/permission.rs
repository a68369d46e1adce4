use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::HierarchyGraph;
use crate::authz::types::ActionDef;

/// Generic actions every schema carries, valid on any resource collection.
pub const CRUD_ACTIONS: [&str; 4] = ["view", "edit", "delete", "create"];

/// `{action}-{collection}` or a bare `{action}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionType {
    pub action: String,
    pub collection: Option<String>,
}

impl PermissionType {
    pub fn new(action: &str, collection: Option<&str>) -> Self {
        Self {
            action: action.to_string(),
            collection: collection.map(|c| c.to_string()),
        }
    }

    /// Syntactic split only; use [`PermissionCatalog::parse`] to validate.
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('-') {
            Some((action, collection)) if !action.is_empty() && !collection.is_empty() => {
                Some(Self::new(action, Some(collection)))
            }
            Some(_) => None,
            None if !s.is_empty() => Some(Self::new(s, None)),
            None => None,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.collection.is_none()
    }

    pub fn qualified(&self, collection: &str) -> Self {
        Self::new(&self.action, Some(collection))
    }
}

impl std::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.collection {
            Some(c) => write!(f, "{}-{}", self.action, c),
            None => f.write_str(&self.action),
        }
    }
}

impl Serialize for PermissionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermissionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PermissionType::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid permission type `{s}`")))
    }
}

/// Registry of every valid permission type and its broader parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCatalog {
    actions: BTreeMap<String, ActionDef>,
    /// permission -> parents, narrow to broad
    parents: BTreeMap<PermissionType, Vec<PermissionType>>,
}

impl PermissionCatalog {
    pub fn build(defs: Vec<ActionDef>, graph: &HierarchyGraph) -> Result<Self, AuthzError> {
        let mut actions: BTreeMap<String, ActionDef> = CRUD_ACTIONS
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ActionDef {
                        name: name.to_string(),
                        collection: None,
                        parents: Vec::new(),
                    },
                )
            })
            .collect();
        for def in defs {
            if CRUD_ACTIONS.contains(&def.name.as_str()) {
                return Err(AuthzError::InvalidSchema(format!(
                    "action `{}` is built in and cannot be redeclared",
                    def.name
                )));
            }
            if actions.contains_key(&def.name) {
                return Err(AuthzError::InvalidSchema(format!(
                    "action `{}` is declared more than once",
                    def.name
                )));
            }
            actions.insert(def.name.clone(), def);
        }

        for action in actions.values() {
            if let Some(collection) = &action.collection {
                graph.collection(collection)?;
                if !graph.is_resource(collection) {
                    return Err(AuthzError::InvalidSchema(format!(
                        "action `{}` is restricted to `{collection}`, which is not a resource",
                        action.name
                    )));
                }
            }
            for parent in &action.parents {
                if !actions.contains_key(parent) {
                    return Err(AuthzError::InvalidSchema(format!(
                        "action `{}` names undefined parent action `{parent}`",
                        action.name
                    )));
                }
            }
        }
        check_action_cycles(&actions)?;

        let mut catalog = Self {
            actions,
            parents: BTreeMap::new(),
        };

        let valid: Vec<PermissionType> = catalog
            .actions
            .values()
            .flat_map(|action| valid_forms(action, graph))
            .collect();
        let valid_set: HashSet<&PermissionType> = valid.iter().collect();

        let mut parents = BTreeMap::new();
        for permission in &valid {
            let mut out = Vec::new();
            catalog.broaden(
                &permission.action,
                permission.collection.as_deref(),
                graph,
                &valid_set,
                permission,
                &mut out,
            );
            parents.insert(permission.clone(), out);
        }
        catalog.parents = parents;

        Ok(catalog)
    }

    fn broaden(
        &self,
        action: &str,
        collection: Option<&str>,
        graph: &HierarchyGraph,
        valid: &HashSet<&PermissionType>,
        origin: &PermissionType,
        out: &mut Vec<PermissionType>,
    ) {
        let push = |candidate: PermissionType, out: &mut Vec<PermissionType>| {
            if &candidate != origin && valid.contains(&candidate) && !out.contains(&candidate) {
                out.push(candidate);
            }
        };

        if let Some(c) = collection {
            for ancestor in graph.resource_ancestors(c) {
                push(PermissionType::new(action, Some(&ancestor)), out);
            }
        }
        push(PermissionType::new(action, None), out);

        let Some(def) = self.actions.get(action) else {
            return;
        };
        for parent in &def.parents {
            if let Some(c) = collection {
                push(PermissionType::new(parent, Some(c)), out);
            }
            self.broaden(parent, collection, graph, valid, origin, out);
        }
    }

    /// Parse and validate a permission type string.
    pub fn parse(&self, s: &str) -> Result<PermissionType, AuthzError> {
        let permission =
            PermissionType::parse(s).ok_or_else(|| AuthzError::UnknownPermission(s.to_string()))?;
        self.validate(&permission)?;
        Ok(permission)
    }

    /// Parse a permission type, qualifying a bare action with `collection`.
    pub fn canonical(&self, s: &str, collection: &str) -> Result<PermissionType, AuthzError> {
        let permission =
            PermissionType::parse(s).ok_or_else(|| AuthzError::UnknownPermission(s.to_string()))?;
        let permission = if permission.is_generic() {
            permission.qualified(collection)
        } else {
            permission
        };
        self.validate(&permission)?;
        Ok(permission)
    }

    pub fn validate(&self, permission: &PermissionType) -> Result<(), AuthzError> {
        if self.parents.contains_key(permission) {
            return Ok(());
        }
        let Some(action) = self.actions.get(&permission.action) else {
            return Err(AuthzError::UnknownPermission(permission.to_string()));
        };
        let reason = match (&action.collection, &permission.collection) {
            (Some(restricted), Some(c)) => format!(
                "action `{}` only applies to `{restricted}` and its ancestors, not `{c}`",
                action.name
            ),
            (_, Some(c)) => format!("`{c}` is not a resource collection"),
            _ => "not registered".to_string(),
        };
        Err(AuthzError::InvalidPermission {
            permission: permission.to_string(),
            reason,
        })
    }

    /// Broader permission types, most specific first.
    pub fn parents(&self, permission: &PermissionType) -> Result<&[PermissionType], AuthzError> {
        self.validate(permission)?;
        Ok(self
            .parents
            .get(permission)
            .map(|v| v.as_slice())
            .unwrap_or(&[]))
    }

    /// The permission followed by all of its parents.
    pub fn family(&self, permission: &PermissionType) -> Result<Vec<PermissionType>, AuthzError> {
        let mut family = vec![permission.clone()];
        family.extend(self.parents(permission)?.iter().cloned());
        Ok(family)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDef> {
        self.actions.values()
    }
}

/// Bare form plus every collection the action may be qualified with.
fn valid_forms(action: &ActionDef, graph: &HierarchyGraph) -> Vec<PermissionType> {
    let mut forms = vec![PermissionType::new(&action.name, None)];
    match &action.collection {
        Some(restricted) => {
            forms.push(PermissionType::new(&action.name, Some(restricted)));
            for ancestor in graph.resource_ancestors(restricted) {
                forms.push(PermissionType::new(&action.name, Some(&ancestor)));
            }
        }
        None => {
            for resource in graph.resources().members() {
                forms.push(PermissionType::new(&action.name, Some(resource)));
            }
        }
    }
    forms
}

fn check_action_cycles(actions: &BTreeMap<String, ActionDef>) -> Result<(), AuthzError> {
    fn visit(
        name: &str,
        actions: &BTreeMap<String, ActionDef>,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
    ) -> Result<(), AuthzError> {
        visited.insert(name.to_string());
        in_stack.insert(name.to_string());
        if let Some(action) = actions.get(name) {
            for parent in &action.parents {
                if in_stack.contains(parent.as_str()) {
                    return Err(AuthzError::CyclicPermission(format!("{name} -> {parent}")));
                }
                if !visited.contains(parent.as_str()) {
                    visit(parent, actions, visited, in_stack)?;
                }
            }
        }
        in_stack.remove(name);
        Ok(())
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    for name in actions.keys() {
        if !visited.contains(name.as_str()) {
            visit(name, actions, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}
