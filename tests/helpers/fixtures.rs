use std::sync::Arc;

use gracl::authz::edges::UpsertPolicy;
use gracl::authz::loader::compile_str;
use gracl::authz::store::MemoryEntityStore;
use gracl::authz::types::Uid;
use gracl::{AuthzState, Gracl};

use super::{EntityBuilder, TestDb};

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
    compile_str(BLOG_SCHEMA).expect("Failed to compile fixture schema")
}

pub fn uid(s: &str) -> Uid {
    Uid::parse(s).expect("Invalid uid")
}

/// Engine over the blog schema with:
/// acme -> blogs b1 (posts p1, p2), b2 (post p3); comment c1 on p1.
/// alice and bob are in team t1 of acme.
pub async fn blog_engine(test_db: &TestDb) -> (Gracl, Arc<MemoryEntityStore>) {
    let store = Arc::new(MemoryEntityStore::new());

    EntityBuilder::new("organization", "acme").insert(&store).await;
    EntityBuilder::new("team", "t1")
        .link("organizationId", "acme")
        .insert(&store)
        .await;
    for user in ["alice", "bob"] {
        EntityBuilder::new("user", user)
            .links("teamIds", &["t1"])
            .insert(&store)
            .await;
    }
    for blog in ["b1", "b2"] {
        EntityBuilder::new("blog", blog)
            .link("organizationId", "acme")
            .insert(&store)
            .await;
    }
    for (post, blog) in [("p1", "b1"), ("p2", "b1"), ("p3", "b2")] {
        EntityBuilder::new("post", post)
            .link("blogId", blog)
            .link("authorId", "alice")
            .insert(&store)
            .await;
    }
    EntityBuilder::new("comment", "c1")
        .link("postId", "p1")
        .insert(&store)
        .await;

    let gracl = Gracl::new(
        Arc::new(blog_state()),
        test_db.connection().clone(),
        store.clone(),
        UpsertPolicy {
            max_attempts: 10,
            retry_delay: std::time::Duration::from_millis(5),
        },
    );
    (gracl, store)
}
