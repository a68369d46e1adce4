//! Portable boolean filter over entity documents.
//!
//! Renders to a Mongo-style JSON document (`$in`, `$nin`, `$and`, `$or`) and
//! can be evaluated directly against `serde_json::Value` documents. Array
//! fields follow Mongo semantics: `$in` matches when any element is in the
//! set, `$nin` when none is.

use std::collections::BTreeSet;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    In { field: String, values: BTreeSet<String> },
    NotIn { field: String, values: BTreeSet<String> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn is_in(field: &str, values: impl IntoIterator<Item = String>) -> Self {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().collect(),
        }
    }

    pub fn not_in(field: &str, values: impl IntoIterator<Item = String>) -> Self {
        Filter::NotIn {
            field: field.to_string(),
            values: values.into_iter().collect(),
        }
    }

    /// Conjunction; a single clause is returned as is.
    pub fn and(mut clauses: Vec<Filter>) -> Self {
        if clauses.len() == 1 {
            return clauses.remove(0);
        }
        Filter::And(clauses)
    }

    /// Disjunction; a single clause is returned as is.
    pub fn or(mut clauses: Vec<Filter>) -> Self {
        if clauses.len() == 1 {
            return clauses.remove(0);
        }
        Filter::Or(clauses)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::In { field, values } => json!({ field.as_str(): { "$in": values } }),
            Filter::NotIn { field, values } => json!({ field.as_str(): { "$nin": values } }),
            Filter::And(clauses) => {
                json!({ "$and": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(clauses) => {
                json!({ "$or": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::In { field, values } => field_ids(doc, field).iter().any(|id| values.contains(id)),
            Filter::NotIn { field, values } => {
                !field_ids(doc, field).iter().any(|id| values.contains(id))
            }
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Outcome of query synthesis for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRestriction {
    /// Nothing is accessible; renders as `false`
    Deny,
    /// No restriction applies; renders as `{}`
    Unrestricted,
    Filter(Filter),
}

impl QueryRestriction {
    pub fn is_deny(&self) -> bool {
        matches!(self, QueryRestriction::Deny)
    }

    pub fn to_json(&self) -> Value {
        match self {
            QueryRestriction::Deny => Value::Bool(false),
            QueryRestriction::Unrestricted => Value::Object(Map::new()),
            QueryRestriction::Filter(filter) => filter.to_json(),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            QueryRestriction::Deny => false,
            QueryRestriction::Unrestricted => true,
            QueryRestriction::Filter(filter) => filter.matches(doc),
        }
    }
}

impl Serialize for QueryRestriction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Ids held by a scalar or array field. Numbers are compared by their
/// decimal rendering.
pub(crate) fn field_ids(doc: &Value, field: &str) -> Vec<String> {
    match doc.get(field) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_id).collect(),
        Some(value) => scalar_id(value).into_iter().collect(),
        None => Vec::new(),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_json() {
        let filter = Filter::and(vec![
            Filter::is_in("blogId", ids(&["b1", "b2"])),
            Filter::not_in("_id", ids(&["p1"])),
        ]);
        assert_eq!(
            filter.to_json(),
            json!({
                "$and": [
                    { "blogId": { "$in": ["b1", "b2"] } },
                    { "_id": { "$nin": ["p1"] } }
                ]
            })
        );
        assert_eq!(QueryRestriction::Deny.to_json(), json!(false));
        assert_eq!(QueryRestriction::Unrestricted.to_json(), json!({}));
    }

    #[test]
    fn test_single_clause_is_unwrapped() {
        let inner = Filter::is_in("_id", ids(&["p1"]));
        assert_eq!(Filter::or(vec![inner.clone()]), inner);
        assert_eq!(Filter::and(vec![inner.clone()]), inner);
    }

    #[test]
    fn test_matches_scalar_fields() {
        let filter = Filter::and(vec![
            Filter::is_in("blogId", ids(&["b1"])),
            Filter::not_in("_id", ids(&["p1"])),
        ]);
        assert!(filter.matches(&json!({ "_id": "p2", "blogId": "b1" })));
        assert!(!filter.matches(&json!({ "_id": "p1", "blogId": "b1" })));
        assert!(!filter.matches(&json!({ "_id": "p3", "blogId": "b9" })));
        assert!(!filter.matches(&json!({ "_id": "p3" })));
    }

    #[test]
    fn test_matches_array_fields() {
        let any_of = Filter::is_in("teamIds", ids(&["t1"]));
        assert!(any_of.matches(&json!({ "teamIds": ["t0", "t1"] })));
        assert!(!any_of.matches(&json!({ "teamIds": [] })));

        let none_of = Filter::not_in("teamIds", ids(&["t1"]));
        assert!(none_of.matches(&json!({ "teamIds": ["t0"] })));
        assert!(!none_of.matches(&json!({ "teamIds": ["t0", "t1"] })));
        assert!(none_of.matches(&json!({})));
    }

    #[test]
    fn test_numeric_ids() {
        let filter = Filter::is_in("_id", ids(&["42"]));
        assert!(filter.matches(&json!({ "_id": 42 })));
    }

    #[test]
    fn test_restriction_serializes_as_document() {
        let restriction = QueryRestriction::Filter(Filter::is_in("_id", ids(&["p1"])));
        assert_eq!(
            serde_json::to_string(&restriction).unwrap(),
            r#"{"_id":{"$in":["p1"]}}"#
        );
        assert!(!QueryRestriction::Deny.matches(&json!({})));
        assert!(QueryRestriction::Unrestricted.matches(&json!({})));
    }
}
