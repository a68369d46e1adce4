use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load schema file `{path}`")]
    #[diagnostic(
        code(gracl::authz::schema_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    SchemaLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema: {0}")]
    #[diagnostic(
        code(gracl::authz::invalid_schema),
        help("Each schema file must contain valid `collection` or `action` KDL nodes")
    )]
    InvalidSchema(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(gracl::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("Cyclic {hierarchy} hierarchy detected: {cycle}")]
    #[diagnostic(
        code(gracl::authz::cyclic_hierarchy),
        help("Check the `parent=#true` links between collections for circular ownership")
    )]
    CyclicHierarchy { hierarchy: &'static str, cycle: String },

    #[error("Cyclic permission inheritance detected: {0}")]
    #[diagnostic(
        code(gracl::authz::cyclic_permission),
        help("Check the `parents` lists in your action definitions for circular references")
    )]
    CyclicPermission(String),

    #[error("No link path from `{from}` to `{to}`")]
    #[diagnostic(
        code(gracl::authz::no_path),
        help("Add a chain of `link` fields leading from `{from}` to `{to}`")
    )]
    NoPath { from: String, to: String },

    #[error("Unknown permission type `{0}`")]
    #[diagnostic(
        code(gracl::authz::unknown_permission),
        help("Declare the action with: action \"<name>\" or use one of view, edit, delete, create")
    )]
    UnknownPermission(String),

    #[error("Invalid permission type `{permission}`: {reason}")]
    #[diagnostic(code(gracl::authz::invalid_permission))]
    InvalidPermission { permission: String, reason: String },

    #[error("Unknown collection `{0}`")]
    #[diagnostic(
        code(gracl::authz::unknown_collection),
        help("Define the collection with: collection \"<name>\" code=\"<3 chars>\"")
    )]
    UnknownCollection(String),

    #[error("Collection `{0}` is not registered as a resource")]
    #[diagnostic(
        code(gracl::authz::not_a_resource),
        help("Mark the collection with resource=#true")
    )]
    NotAResource(String),

    #[error("Collection `{0}` is not registered as a subject")]
    #[diagnostic(
        code(gracl::authz::not_a_subject),
        help("Mark the collection with subject=#true")
    )]
    NotASubject(String),

    #[error("Invalid uid `{0}`")]
    #[diagnostic(
        code(gracl::authz::invalid_uid),
        help("A uid is a registered 3-character collection code followed by the entity id")
    )]
    InvalidUid(String),

    #[error("Empty permission patch for {subject} -> {resource}")]
    #[diagnostic(
        code(gracl::authz::empty_patch),
        help("Pass at least one `permission=true|false` entry")
    )]
    EmptyPatch { subject: String, resource: String },

    #[error("Permission edge upsert for {subject} -> {resource} still conflicting after {attempts} attempts")]
    #[diagnostic(code(gracl::authz::duplicate_edge_race))]
    DuplicateEdgeRace {
        subject: String,
        resource: String,
        attempts: u32,
    },

    #[error("Debug graph has no node for `{0}`")]
    #[diagnostic(
        code(gracl::authz::stale_debug_graph),
        help("Explanations must be built from the same resolution pass that recorded them")
    )]
    StaleDebugGraph(String),

    #[error("Entity store error: {0}")]
    #[diagnostic(code(gracl::authz::store))]
    Store(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(gracl::authz::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(gracl::authz::serde))]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(gracl::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Schema and configuration mistakes. These are raised before any I/O and
    /// must never be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthzError::SchemaLoadError { .. }
                | AuthzError::InvalidSchema(_)
                | AuthzError::KdlParse(_)
                | AuthzError::CyclicHierarchy { .. }
                | AuthzError::CyclicPermission(_)
                | AuthzError::NoPath { .. }
                | AuthzError::UnknownPermission(_)
                | AuthzError::InvalidPermission { .. }
                | AuthzError::UnknownCollection(_)
                | AuthzError::NotAResource(_)
                | AuthzError::NotASubject(_)
                | AuthzError::InvalidUid(_)
        )
    }
}
