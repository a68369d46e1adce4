use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::json;
use tempfile::NamedTempFile;

use crate::authz::loader::compile_str;
use crate::authz::store::MemoryEntityStore;
use crate::authz::AuthzState;

pub const BLOG_SCHEMA: &str = r#"
collection "organization" code="o00" resource=#true subject=#true
collection "team" code="t00" subject=#true {
    link "organizationId" to="organization" parent=#true
}
collection "user" code="u00" subject=#true {
    link "teamIds" to="team" parent=#true
}
collection "blog" code="b00" resource=#true {
    link "organizationId" to="organization" parent=#true
}
collection "post" code="p00" resource=#true {
    link "blogId" to="blog" parent=#true
    link "authorId" to="user"
}
collection "comment" code="c00" resource=#true {
    link "postId" to="post" parent=#true
}
action "publish" collection="post" {
    parents {
        - "edit"
    }
}
"#;

pub fn blog_state() -> AuthzState {
    compile_str(BLOG_SCHEMA).expect("fixture schema compiles")
}

/// acme owns blogs b1 (posts p1, p2) and b2 (post p3); c1 comments on p1,
/// c2 on p3. alice is in team t1 of acme.
pub async fn blog_store() -> MemoryEntityStore {
    let store = MemoryEntityStore::new();
    store.insert("organization", "acme", json!({ "_id": "acme" })).await;
    store
        .insert("team", "t1", json!({ "_id": "t1", "organizationId": "acme" }))
        .await;
    store
        .insert("user", "alice", json!({ "_id": "alice", "teamIds": ["t1"] }))
        .await;
    for (blog, org) in [("b1", "acme"), ("b2", "acme")] {
        store
            .insert("blog", blog, json!({ "_id": blog, "organizationId": org }))
            .await;
    }
    for (post, blog) in [("p1", "b1"), ("p2", "b1"), ("p3", "b2")] {
        store
            .insert("post", post, json!({ "_id": post, "blogId": blog, "authorId": "alice" }))
            .await;
    }
    for (comment, post) in [("c1", "p1"), ("c2", "p3")] {
        store
            .insert("comment", comment, json!({ "_id": comment, "postId": post }))
            .await;
    }
    store
}

/// Test database helper that keeps temp file alive
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}
