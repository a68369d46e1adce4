use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::KdlDocument;

const DEFAULT_PRIMARY_KEY: &str = "_id";

/// Parse a KDL document string into typed schema structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedSchema, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut schema = ParsedSchema::default();

    for node in doc.nodes() {
        match node.name().value() {
            "collection" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidSchema(
                        "collection node requires a string argument (e.g. collection \"post\" code=\"p00\")"
                            .into(),
                    )
                })?;

                let code = string_prop(node, "code").ok_or_else(|| {
                    AuthzError::InvalidSchema(format!(
                        "collection `{name}` missing `code` property (e.g. code=\"p00\")"
                    ))
                })?;
                if code.chars().count() != UID_CODE_WIDTH || code.len() != UID_CODE_WIDTH {
                    return Err(AuthzError::InvalidSchema(format!(
                        "collection `{name}` code `{code}` must be exactly {UID_CODE_WIDTH} ASCII characters"
                    )));
                }

                let primary_key = string_prop(node, "primary-key")
                    .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());

                let mut links = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "link" => {
                                let field = first_string_arg(child).ok_or_else(|| {
                                    AuthzError::InvalidSchema(format!(
                                        "link in collection `{name}` requires a field argument (e.g. link \"blogId\" to=\"blog\")"
                                    ))
                                })?;
                                let to = string_prop(child, "to").ok_or_else(|| {
                                    AuthzError::InvalidSchema(format!(
                                        "link `{field}` in collection `{name}` missing `to` property"
                                    ))
                                })?;
                                links.push(LinkDef {
                                    field,
                                    to,
                                    parent: bool_prop(child, "parent"),
                                });
                            }
                            other => {
                                return Err(AuthzError::InvalidSchema(format!(
                                    "unexpected child `{other}` in collection `{name}` (expected `link`)"
                                )));
                            }
                        }
                    }
                }

                schema.collections.push(CollectionDef {
                    name,
                    code,
                    primary_key,
                    resource: bool_prop(node, "resource"),
                    subject: bool_prop(node, "subject"),
                    links,
                });
            }
            "action" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidSchema(
                        "action node requires a string argument (e.g. action \"publish\")".into(),
                    )
                })?;
                if name.is_empty() || name.contains('-') {
                    return Err(AuthzError::InvalidSchema(format!(
                        "action name `{name}` must be non-empty and must not contain `-`"
                    )));
                }

                let mut parents = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "parents" => {
                                parents = dash_list(child);
                            }
                            other => {
                                return Err(AuthzError::InvalidSchema(format!(
                                    "unexpected child `{other}` in action `{name}` (expected `parents`)"
                                )));
                            }
                        }
                    }
                }

                schema.actions.push(ActionDef {
                    name,
                    collection: string_prop(node, "collection"),
                    parents,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(schema)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &kdl::KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn bool_prop(node: &kdl::KdlNode, key: &str) -> bool {
    node.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// parents {
///     - "edit"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_with_links() {
        let kdl = r#"
collection "post" code="p00" resource=#true {
    link "blogId" to="blog" parent=#true
    link "authorId" to="user"
}
"#;
        let schema = parse_kdl_document(kdl).unwrap();
        assert_eq!(schema.collections.len(), 1);
        let post = &schema.collections[0];
        assert_eq!(post.name, "post");
        assert_eq!(post.code, "p00");
        assert_eq!(post.primary_key, "_id");
        assert!(post.resource);
        assert!(!post.subject);
        assert_eq!(post.links.len(), 2);
        assert_eq!(post.links[0].field, "blogId");
        assert_eq!(post.links[0].to, "blog");
        assert!(post.links[0].parent);
        assert!(!post.links[1].parent);
    }

    #[test]
    fn test_parse_custom_primary_key() {
        let kdl = r#"collection "user" code="u00" subject=#true primary-key="uuid""#;
        let schema = parse_kdl_document(kdl).unwrap();
        assert_eq!(schema.collections[0].primary_key, "uuid");
        assert!(schema.collections[0].subject);
    }

    #[test]
    fn test_parse_action_with_parents() {
        let kdl = r#"
action "publish" collection="post" {
    parents {
        - "edit"
    }
}
"#;
        let schema = parse_kdl_document(kdl).unwrap();
        assert_eq!(schema.actions.len(), 1);
        let action = &schema.actions[0];
        assert_eq!(action.name, "publish");
        assert_eq!(action.collection.as_deref(), Some("post"));
        assert_eq!(action.parents, vec!["edit"]);
    }

    #[test]
    fn test_parse_missing_code() {
        let err = parse_kdl_document(r#"collection "post""#).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidSchema(_)));
    }

    #[test]
    fn test_parse_wrong_code_width() {
        let err = parse_kdl_document(r#"collection "post" code="post""#).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidSchema(_)));
    }

    #[test]
    fn test_parse_link_missing_to() {
        let kdl = r#"
collection "post" code="p00" {
    link "blogId"
}
"#;
        let err = parse_kdl_document(kdl).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidSchema(_)));
    }

    #[test]
    fn test_parse_dashed_action_rejected() {
        let err = parse_kdl_document(r#"action "view-all""#).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidSchema(_)));
    }

    #[test]
    fn test_parse_unknown_node_ignored() {
        let schema = parse_kdl_document(r#"widget "x""#).unwrap();
        assert!(schema.collections.is_empty());
        assert!(schema.actions.is_empty());
    }

    #[test]
    fn test_parse_invalid_kdl() {
        let err = parse_kdl_document("collection \"post").unwrap_err();
        assert!(matches!(err, AuthzError::KdlParse(_)));
    }
}
