use std::collections::BTreeMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::authz::edges::{self, EdgeQuery, PermissionEdge, UpsertPolicy};
use crate::authz::errors::AuthzError;
use crate::authz::explain::AccessExplanation;
use crate::authz::filter::QueryRestriction;
use crate::authz::permission::PermissionType;
use crate::authz::query::Synthesis;
use crate::authz::resolver::Resolver;
use crate::authz::store::EntityStore;
use crate::authz::types::Uid;
use crate::authz::AuthzState;

/// Entry point tying the compiled schema, the edge table and the entity
/// store together. Cheap to clone.
#[derive(Clone)]
pub struct Gracl {
    state: Arc<AuthzState>,
    db: DatabaseConnection,
    store: Arc<dyn EntityStore>,
    policy: UpsertPolicy,
}

impl Gracl {
    pub fn new(
        state: Arc<AuthzState>,
        db: DatabaseConnection,
        store: Arc<dyn EntityStore>,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            state,
            db,
            store,
            policy,
        }
    }

    pub fn state(&self) -> &AuthzState {
        &self.state
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.state, &self.db, self.store.as_ref())
    }

    /// Whether `subject` holds `permission` on `resource`. A bare action is
    /// qualified with the resource's collection.
    pub async fn is_allowed(
        &self,
        resource: &Uid,
        permission: &str,
        subject: &Uid,
    ) -> Result<bool, AuthzError> {
        let access = self.determine_access(resource, &[permission], subject).await?;
        Ok(access.values().all(|allowed| *allowed))
    }

    pub async fn determine_access(
        &self,
        resource: &Uid,
        permissions: &[&str],
        subject: &Uid,
    ) -> Result<BTreeMap<PermissionType, bool>, AuthzError> {
        let collection = self.state.resource_collection(resource)?.name.clone();
        let permissions = permissions
            .iter()
            .map(|p| self.state.catalog.canonical(p, &collection))
            .collect::<Result<Vec<_>, _>>()?;

        self.resolver().check(resource, &permissions, subject).await
    }

    /// Filter restricting `collection` to what `subject` holds `permission` on.
    pub async fn query(
        &self,
        collection: &str,
        permission: &str,
        subject: Option<&Uid>,
    ) -> Result<QueryRestriction, AuthzError> {
        Ok(self.synthesize(collection, permission, subject).await?.restriction)
    }

    /// Like [`Gracl::query`], keeping the positive/negative sets and debug
    /// graph the filter was built from.
    pub async fn synthesize(
        &self,
        collection: &str,
        permission: &str,
        subject: Option<&Uid>,
    ) -> Result<Synthesis, AuthzError> {
        self.resolver().synthesize(subject, permission, collection).await
    }

    /// Merge `patch` into the edge between `subject` and `resource`. Bare
    /// actions are stored generic.
    pub async fn update_permissions<'p>(
        &self,
        resource: &Uid,
        patch: impl IntoIterator<Item = (&'p str, bool)>,
        subject: &Uid,
    ) -> Result<PermissionEdge, AuthzError> {
        let resource_type = self.state.resource_collection(resource)?.name.clone();
        let subject_type = self.state.subject_collection(subject)?.name.clone();
        let patch = self.state.validate_patch(patch)?;

        let edge = edges::upsert_edge(
            &self.db,
            subject,
            &subject_type,
            resource,
            &resource_type,
            &patch,
            &self.policy,
        )
        .await?;

        tracing::info!(
            %subject,
            %resource,
            keys = patch.len(),
            "Updated permissions"
        );
        Ok(edge)
    }

    pub async fn explain_access(
        &self,
        resource: &Uid,
        permission: &str,
        subject: &Uid,
    ) -> Result<AccessExplanation, AuthzError> {
        let collection = self.state.resource_collection(resource)?.name.clone();
        let resolver = self.resolver();

        let synthesis = resolver.synthesize(Some(subject), permission, &collection).await?;
        let explanations = resolver.explain(&synthesis, resource).await?;
        let has_access = self.is_allowed(resource, permission, subject).await?;

        Ok(AccessExplanation {
            has_access,
            explanations,
            resource_id: resource.clone(),
            subject_id: subject.clone(),
        })
    }

    /// Drop every edge held by or granted on `uid`.
    pub async fn remove_all_for(&self, uid: &Uid) -> Result<u64, AuthzError> {
        edges::remove_all_for(&self.db, uid).await
    }

    /// Edges where `uid` is the subject or the resource, oldest first.
    pub async fn edges_for(&self, uid: &Uid) -> Result<Vec<PermissionEdge>, AuthzError> {
        let mut found =
            edges::find_edges(&self.db, &EdgeQuery::default().subjects([uid.clone()])).await?;
        found.extend(edges::find_edges(&self.db, &EdgeQuery::default().resources([uid.clone()])).await?);
        found.sort_by_key(|e| e.id);
        found.dedup_by_key(|e| e.id);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::test_support::{blog_state, blog_store, TestDb};

    async fn engine(test_db: &TestDb) -> Gracl {
        Gracl::new(
            Arc::new(blog_state()),
            test_db.connection().clone(),
            Arc::new(blog_store().await),
            UpsertPolicy::default(),
        )
    }

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_no_edges_denies() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;
        assert!(!gracl
            .is_allowed(&uid("p00p1"), "view", &uid("u00alice"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_grant_on_ancestor_allows() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;

        gracl
            .update_permissions(&uid("b00b1"), [("view-blog", true)], &uid("u00alice"))
            .await
            .unwrap();

        assert!(gracl
            .is_allowed(&uid("p00p1"), "view", &uid("u00alice"))
            .await
            .unwrap());
        assert!(!gracl
            .is_allowed(&uid("p00p1"), "edit", &uid("u00alice"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_team_grant_reaches_member() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;

        gracl
            .update_permissions(&uid("o00acme"), [("edit", true)], &uid("t00t1"))
            .await
            .unwrap();

        let access = gracl
            .determine_access(&uid("p00p1"), &["edit", "view"], &uid("u00alice"))
            .await
            .unwrap();
        assert_eq!(access.get(&PermissionType::new("edit", Some("post"))), Some(&true));
        assert_eq!(access.get(&PermissionType::new("view", Some("post"))), Some(&false));
    }

    #[tokio::test]
    async fn test_user_deny_beats_team_allow() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;

        gracl
            .update_permissions(&uid("b00b1"), [("view-blog", true)], &uid("t00t1"))
            .await
            .unwrap();
        gracl
            .update_permissions(&uid("b00b1"), [("view-blog", false)], &uid("u00alice"))
            .await
            .unwrap();

        assert!(!gracl
            .is_allowed(&uid("p00p1"), "view", &uid("u00alice"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_permissions_validates_roles() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;

        let err = gracl
            .update_permissions(&uid("u00alice"), [("view", true)], &uid("u00alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::NotAResource(_)));

        let err = gracl
            .update_permissions(&uid("p00p1"), [("view", true)], &uid("p00p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::NotASubject(_)));

        let err = gracl
            .update_permissions(&uid("p00p1"), [("fly-post", true)], &uid("u00alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownPermission(_)));
        assert!(gracl.edges_for(&uid("u00alice")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_for_and_edges_for() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;

        gracl
            .update_permissions(&uid("b00b1"), [("view", true)], &uid("u00alice"))
            .await
            .unwrap();
        gracl
            .update_permissions(&uid("p00p1"), [("edit", true)], &uid("u00alice"))
            .await
            .unwrap();
        gracl
            .update_permissions(&uid("b00b1"), [("view", true)], &uid("t00t1"))
            .await
            .unwrap();

        assert_eq!(gracl.edges_for(&uid("u00alice")).await.unwrap().len(), 2);
        assert_eq!(gracl.edges_for(&uid("b00b1")).await.unwrap().len(), 2);

        assert_eq!(gracl.remove_all_for(&uid("b00b1")).await.unwrap(), 2);
        assert_eq!(gracl.edges_for(&uid("u00alice")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_without_subject_denies() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;
        let restriction = gracl.query("post", "view", None).await.unwrap();
        assert_eq!(restriction, QueryRestriction::Deny);
    }

    #[tokio::test]
    async fn test_query_on_non_resource_is_unrestricted() {
        let test_db = TestDb::new().await;
        let gracl = engine(&test_db).await;
        let restriction = gracl
            .query("user", "view", Some(&uid("u00alice")))
            .await
            .unwrap();
        assert_eq!(restriction, QueryRestriction::Unrestricted);
    }
}
