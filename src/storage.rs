use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::authz::loader::load_schema;
use crate::authz::AuthzState;
use crate::errors::GraclError;
use crate::settings::{Database as DbCfg, Schema as SchemaCfg};

/// Connect and bring the edge table up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, GraclError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!(url = %cfg.url, "Database ready");
    Ok(db)
}

/// Load and compile the KDL schema directory.
pub fn load_state(cfg: &SchemaCfg) -> Result<AuthzState, GraclError> {
    Ok(load_schema(&cfg.path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::edges::{find_edges, EdgeQuery};
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_init_runs_migrations() {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let cfg = DbCfg {
            url: format!("sqlite://{}?mode=rwc", temp_file.path().display()),
        };

        let db = init(&cfg).await.expect("Failed to init database");
        let edges = find_edges(&db, &EdgeQuery::default())
            .await
            .expect("permission_edges table should exist");
        assert!(edges.is_empty());

        // Running the migrations twice is a no-op
        init(&cfg).await.expect("Second init failed");
    }

    #[test]
    fn test_load_state_from_directory() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("schema.kdl"),
            r#"collection "blog" code="b00" resource=#true"#,
        )
        .unwrap();

        let state = load_state(&SchemaCfg {
            path: dir.path().to_path_buf(),
        })
        .expect("Failed to load schema");
        assert!(state.graph.is_resource("blog"));
    }

    #[test]
    fn test_load_state_missing_directory() {
        let err = load_state(&SchemaCfg {
            path: PathBuf::from("/nonexistent/schema"),
        })
        .unwrap_err();
        assert!(matches!(err, GraclError::Authz(_)));
    }
}
