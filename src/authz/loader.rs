use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::HierarchyGraph;
use crate::authz::permission::PermissionCatalog;
use crate::authz::schema::parse_kdl_document;
use crate::authz::types::*;
use crate::authz::AuthzState;

/// Load all `.kdl` schema files from the given directory and compile them
/// into a single immutable `AuthzState`.
pub fn load_schema(dir: &Path) -> Result<AuthzState, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidSchema(format!(
            "schema directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::SchemaLoadError {
                path: path.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
        file_count += 1;
    }

    let state = compile_schema(all_parsed)?;

    tracing::info!(
        files = file_count,
        collections = state.graph.collections().count(),
        resources = state.graph.resources().members().count(),
        subjects = state.graph.subjects().members().count(),
        actions = state.catalog.actions().count(),
        "Loaded authorization schema"
    );

    Ok(state)
}

/// Merge and compile all parsed schema files into a single `AuthzState`.
pub fn compile_schema(parsed: Vec<ParsedSchema>) -> Result<AuthzState, AuthzError> {
    let mut collections: Vec<CollectionDef> = Vec::new();
    let mut actions: Vec<ActionDef> = Vec::new();

    for p in parsed {
        collections.extend(p.collections);
        actions.extend(p.actions);
    }

    let graph = HierarchyGraph::build(collections)?;
    let catalog = PermissionCatalog::build(actions, &graph)?;

    Ok(AuthzState { graph, catalog })
}

/// Compile a single KDL document; handy for embedded schemas.
pub fn compile_str(source: &str) -> Result<AuthzState, AuthzError> {
    compile_schema(vec![parse_kdl_document(source)?])
}
