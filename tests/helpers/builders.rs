use gracl::authz::store::MemoryEntityStore;
use serde_json::{Map, Value};

/// Builder for entity documents stored in a `MemoryEntityStore`
pub struct EntityBuilder {
    collection: String,
    id: String,
    doc: Map<String, Value>,
}

impl EntityBuilder {
    pub fn new(collection: &str, id: &str) -> Self {
        let mut doc = Map::new();
        doc.insert("_id".to_string(), Value::String(id.to_string()));
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            doc,
        }
    }

    /// Single-valued link field
    pub fn link(mut self, field: &str, id: &str) -> Self {
        self.doc
            .insert(field.to_string(), Value::String(id.to_string()));
        self
    }

    /// Array-valued link field
    pub fn links(mut self, field: &str, ids: &[&str]) -> Self {
        let values = ids.iter().map(|id| Value::String(id.to_string())).collect();
        self.doc.insert(field.to_string(), Value::Array(values));
        self
    }

    pub async fn insert(self, store: &MemoryEntityStore) {
        store
            .insert(&self.collection, &self.id, Value::Object(self.doc))
            .await;
    }
}
