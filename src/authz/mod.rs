pub mod edges;
pub mod engine;
pub mod errors;
pub mod explain;
pub mod filter;
pub mod hierarchy;
pub mod loader;
pub mod permission;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use errors::AuthzError;
use hierarchy::HierarchyGraph;
use permission::{PermissionCatalog, PermissionType};
use types::{CollectionDef, Uid};

/// Fully compiled authorization schema, loaded from KDL files.
/// Immutable after construction; schema changes require a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzState {
    pub graph: HierarchyGraph,
    pub catalog: PermissionCatalog,
}

impl AuthzState {
    pub fn uid(&self, collection: &str, id: &str) -> Result<Uid, AuthzError> {
        self.graph.uid(collection, id)
    }

    pub fn parse_uid(&self, s: &str) -> Result<(String, String), AuthzError> {
        self.graph.parse_uid(s)
    }

    /// Collection of `uid`, which must be a registered resource.
    pub fn resource_collection(&self, uid: &Uid) -> Result<&CollectionDef, AuthzError> {
        let def = self.graph.collection_of(uid)?;
        if !self.graph.is_resource(&def.name) {
            return Err(AuthzError::NotAResource(def.name.clone()));
        }
        Ok(def)
    }

    /// Collection of `uid`, which must be a registered subject.
    pub fn subject_collection(&self, uid: &Uid) -> Result<&CollectionDef, AuthzError> {
        let def = self.graph.collection_of(uid)?;
        if !self.graph.is_subject(&def.name) {
            return Err(AuthzError::NotASubject(def.name.clone()));
        }
        Ok(def)
    }

    /// Validate a grant/deny patch before it touches the edge store. Bare
    /// actions stay generic.
    pub fn validate_patch<'a>(
        &self,
        patch: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<Vec<(PermissionType, bool)>, AuthzError> {
        patch
            .into_iter()
            .map(|(name, allowed)| Ok((self.catalog.parse(name)?, allowed)))
            .collect()
    }
}
