//! Read access to the entities the hierarchy is made of.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::filter::{field_ids, QueryRestriction};

/// Link lookups needed to walk entity relations.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Values of a link field (scalar or array) on one entity. A missing
    /// entity or field yields an empty list.
    async fn linked_ids(
        &self,
        collection: &str,
        id: &str,
        field: &str,
    ) -> Result<Vec<String>, AuthzError>;

    /// `(child_id, parent_id)` for every entity of `collection` whose `field`
    /// references one of `ids`.
    async fn find_links(
        &self,
        collection: &str,
        field: &str,
        ids: &BTreeSet<String>,
    ) -> Result<Vec<(String, String)>, AuthzError>;
}

/// JSON documents per collection, keyed by primary key. Intended for tests
/// and embedded use.
#[derive(Default)]
pub struct MemoryEntityStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub async fn insert(&self, collection: &str, id: &str, doc: Value) {
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let guard = self.collections.read().await;
        guard.get(collection).and_then(|docs| docs.get(id)).cloned()
    }

    pub async fn remove(&self, collection: &str, id: &str) -> Option<Value> {
        let mut guard = self.collections.write().await;
        guard.get_mut(collection).and_then(|docs| docs.remove(id))
    }

    /// Documents of `collection` passing `restriction`, in id order.
    pub async fn find_all(&self, collection: &str, restriction: &QueryRestriction) -> Vec<Value> {
        let guard = self.collections.read().await;
        guard
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.values())
            .filter(|doc| restriction.matches(doc))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn linked_ids(
        &self,
        collection: &str,
        id: &str,
        field: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| field_ids(doc, field))
            .unwrap_or_default())
    }

    async fn find_links(
        &self,
        collection: &str,
        field: &str,
        ids: &BTreeSet<String>,
    ) -> Result<Vec<(String, String)>, AuthzError> {
        let guard = self.collections.read().await;
        let mut links = Vec::new();
        for (child, doc) in guard.get(collection).into_iter().flatten() {
            for parent in field_ids(doc, field) {
                if ids.contains(&parent) {
                    links.push((child.clone(), parent));
                }
            }
        }
        Ok(links)
    }
}
