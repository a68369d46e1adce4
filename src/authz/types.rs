use serde::{Deserialize, Serialize};

/// Width of the collection code prefix of every uid.
pub const UID_CODE_WIDTH: usize = 3;

/// Globally unique entity identity: collection code followed by the
/// entity's primary key, e.g. "p00abc".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(code: &str, id: &str) -> Self {
        Self(format!("{code}{id}"))
    }

    /// Splits a uid string without checking the code against a schema.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() <= UID_CODE_WIDTH || !s.is_char_boundary(UID_CODE_WIDTH) {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn code(&self) -> &str {
        &self.0[..UID_CODE_WIDTH]
    }

    pub fn id(&self) -> &str {
        &self.0[UID_CODE_WIDTH..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid uid `{s}`")))
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------- Schema domain types ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDef {
    /// Field on the owning collection holding the foreign id(s)
    pub field: String,
    /// Collection the field points to
    pub to: String,
    /// Owned-by relation: the linked entity is a parent in the hierarchy
    pub parent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: String,
    pub code: String,
    pub primary_key: String,
    pub resource: bool,
    pub subject: bool,
    pub links: Vec<LinkDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    pub name: String,
    /// Restricts the action to one resource collection (and its ancestors)
    pub collection: Option<String>,
    /// Broader actions implying this one, e.g. "edit" for "view"
    pub parents: Vec<String>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedSchema {
    pub collections: Vec<CollectionDef>,
    pub actions: Vec<ActionDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_parse() {
        let uid = Uid::parse("p00abc").unwrap();
        assert_eq!(uid.code(), "p00");
        assert_eq!(uid.id(), "abc");
        assert_eq!(uid.to_string(), "p00abc");
        assert_eq!(uid, Uid::new("p00", "abc"));

        assert!(Uid::parse("p00").is_none());
        assert!(Uid::parse("").is_none());
    }

    #[test]
    fn test_uid_serde_is_plain_string() {
        let uid = Uid::new("u00", "alice");
        assert_eq!(serde_json::to_string(&uid).unwrap(), "\"u00alice\"");
        let back: Uid = serde_json::from_str("\"u00alice\"").unwrap();
        assert_eq!(back, uid);
    }

    #[test]
    fn test_uid_deserialize_rejects_short_strings() {
        assert!(serde_json::from_str::<Uid>("\"ab\"").is_err());
        assert!(serde_json::from_str::<Uid>("\"u00\"").is_err());
    }
}
