//! Persisted subject -> resource grant/deny records.
//!
//! At most one row exists per `(subject_id, resource_id)`. Identity columns are
//! written once on insert; later upserts only merge keys into `access`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::Serialize;

use crate::authz::errors::AuthzError;
use crate::authz::permission::PermissionType;
use crate::authz::types::Uid;
use crate::entities;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEdge {
    pub id: i32,
    pub subject_id: Uid,
    pub resource_id: Uid,
    pub subject_type: String,
    pub resource_type: String,
    /// permission type -> explicit allow (true) or deny (false)
    pub access: BTreeMap<String, bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PermissionEdge {
    /// Whether the edge carries an explicit value for any of `permissions`.
    pub fn mentions_any(&self, permissions: &[String]) -> bool {
        permissions.iter().any(|p| self.access.contains_key(p))
    }
}

impl TryFrom<entities::permission_edge::Model> for PermissionEdge {
    type Error = AuthzError;

    fn try_from(model: entities::permission_edge::Model) -> Result<Self, Self::Error> {
        let subject_id = Uid::parse(&model.subject_id)
            .ok_or_else(|| AuthzError::InvalidUid(model.subject_id.clone()))?;
        let resource_id = Uid::parse(&model.resource_id)
            .ok_or_else(|| AuthzError::InvalidUid(model.resource_id.clone()))?;
        Ok(Self {
            id: model.id,
            subject_id,
            resource_id,
            subject_type: model.subject_type,
            resource_type: model.resource_type,
            access: serde_json::from_str(&model.access)?,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Filter for [`find_edges`]. `None` leaves a dimension unrestricted; an empty
/// list matches nothing.
#[derive(Debug, Clone, Default)]
pub struct EdgeQuery {
    pub subject_ids: Option<Vec<Uid>>,
    pub resource_ids: Option<Vec<Uid>>,
    pub resource_types: Option<Vec<String>>,
    /// Keep only edges with an explicit value for one of these permissions
    pub permissions: Option<Vec<String>>,
}

impl EdgeQuery {
    pub fn subjects(mut self, ids: impl IntoIterator<Item = Uid>) -> Self {
        self.subject_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn resources(mut self, ids: impl IntoIterator<Item = Uid>) -> Self {
        self.resource_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn resource_types(mut self, types: impl IntoIterator<Item = String>) -> Self {
        self.resource_types = Some(types.into_iter().collect());
        self
    }

    pub fn permissions<'a>(mut self, permissions: impl IntoIterator<Item = &'a PermissionType>) -> Self {
        self.permissions = Some(permissions.into_iter().map(|p| p.to_string()).collect());
        self
    }

    fn is_empty_match(&self) -> bool {
        self.subject_ids.as_ref().is_some_and(|v| v.is_empty())
            || self.resource_ids.as_ref().is_some_and(|v| v.is_empty())
            || self.resource_types.as_ref().is_some_and(|v| v.is_empty())
            || self.permissions.as_ref().is_some_and(|v| v.is_empty())
    }
}

/// Retry policy for first-insert races on the unique `(subject, resource)` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for UpsertPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

pub async fn get_edge(
    db: &DatabaseConnection,
    subject: &Uid,
    resource: &Uid,
) -> Result<Option<PermissionEdge>, AuthzError> {
    use entities::permission_edge::{Column, Entity};

    Entity::find()
        .filter(Column::SubjectId.eq(subject.as_str()))
        .filter(Column::ResourceId.eq(resource.as_str()))
        .one(db)
        .await?
        .map(PermissionEdge::try_from)
        .transpose()
}

pub async fn find_edges(
    db: &DatabaseConnection,
    query: &EdgeQuery,
) -> Result<Vec<PermissionEdge>, AuthzError> {
    use entities::permission_edge::{Column, Entity};

    if query.is_empty_match() {
        return Ok(Vec::new());
    }

    let mut select = Entity::find();
    if let Some(ids) = &query.subject_ids {
        select = select.filter(Column::SubjectId.is_in(ids.iter().map(|u| u.as_str())));
    }
    if let Some(ids) = &query.resource_ids {
        select = select.filter(Column::ResourceId.is_in(ids.iter().map(|u| u.as_str())));
    }
    if let Some(types) = &query.resource_types {
        select = select.filter(Column::ResourceType.is_in(types.iter().map(|t| t.as_str())));
    }

    let models = select.order_by_asc(Column::Id).all(db).await?;

    let mut edges = Vec::with_capacity(models.len());
    for model in models {
        let edge = PermissionEdge::try_from(model)?;
        // access is JSON text, so key matching happens after the fetch
        if let Some(permissions) = &query.permissions {
            if !edge.mentions_any(permissions) {
                continue;
            }
        }
        edges.push(edge);
    }
    Ok(edges)
}

/// Insert or merge the `access` patch for one subject/resource pair.
///
/// Merging into an existing row is a single `UPDATE` that patches the JSON
/// column in place, so concurrent writers on different keys keep each
/// other's keys. Two first-time upserts for the same pair can race on the unique index; the
/// loser retries (and then finds the winner's row to merge into) up to
/// `policy.max_attempts` times before giving up with `DuplicateEdgeRace`.
pub async fn upsert_edge(
    db: &DatabaseConnection,
    subject: &Uid,
    subject_type: &str,
    resource: &Uid,
    resource_type: &str,
    patch: &[(PermissionType, bool)],
    policy: &UpsertPolicy,
) -> Result<PermissionEdge, AuthzError> {
    if patch.is_empty() {
        return Err(AuthzError::EmptyPatch {
            subject: subject.to_string(),
            resource: resource.to_string(),
        });
    }

    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match try_upsert(db, subject, subject_type, resource, resource_type, patch).await {
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(
                    %subject,
                    %resource,
                    attempt,
                    "Permission edge insert raced with another writer, retrying"
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
            other => return other,
        }
    }

    Err(AuthzError::DuplicateEdgeRace {
        subject: subject.to_string(),
        resource: resource.to_string(),
        attempts,
    })
}

async fn try_upsert(
    db: &DatabaseConnection,
    subject: &Uid,
    subject_type: &str,
    resource: &Uid,
    resource_type: &str,
    patch: &[(PermissionType, bool)],
) -> Result<PermissionEdge, AuthzError> {
    use entities::permission_edge::{self, Column, Entity};

    let now = Utc::now().timestamp();
    let access: BTreeMap<String, bool> = patch
        .iter()
        .map(|(permission, allowed)| (permission.to_string(), *allowed))
        .collect();
    let encoded = serde_json::to_string(&access)?;

    let merged = Entity::update_many()
        .col_expr(Column::Access, merge_access(db.get_database_backend(), &encoded))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::SubjectId.eq(subject.as_str()))
        .filter(Column::ResourceId.eq(resource.as_str()))
        .exec(db)
        .await?;

    if merged.rows_affected > 0 {
        return get_edge(db, subject, resource).await?.ok_or_else(|| {
            AuthzError::Db(DbErr::RecordNotFound(format!(
                "permission edge {subject} -> {resource} removed during update"
            )))
        });
    }

    let active = permission_edge::ActiveModel {
        id: Default::default(),
        subject_id: Set(subject.to_string()),
        resource_id: Set(resource.to_string()),
        subject_type: Set(subject_type.to_string()),
        resource_type: Set(resource_type.to_string()),
        access: Set(encoded),
        created_at: Set(now),
        updated_at: Set(now),
    };
    PermissionEdge::try_from(active.insert(db).await?)
}

/// `access` with `patch` (a JSON object) merged over it, key by key.
fn merge_access(backend: DbBackend, patch: &str) -> SimpleExpr {
    match backend {
        DbBackend::Postgres => {
            Expr::cust_with_values("(access::jsonb || ?::jsonb)::text", [patch.to_string()])
        }
        DbBackend::MySql => Expr::cust_with_values("JSON_MERGE_PATCH(access, ?)", [patch.to_string()]),
        _ => Expr::cust_with_values("json_patch(access, ?)", [patch.to_string()]),
    }
}

fn is_unique_violation(err: &AuthzError) -> bool {
    match err {
        AuthzError::Db(e) => matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))),
        _ => false,
    }
}

/// Delete every edge where `uid` is the subject or the resource. Called when
/// the entity itself is deleted.
pub async fn remove_all_for(db: &DatabaseConnection, uid: &Uid) -> Result<u64, AuthzError> {
    use entities::permission_edge::{Column, Entity};

    let result = Entity::delete_many()
        .filter(
            Condition::any()
                .add(Column::SubjectId.eq(uid.as_str()))
                .add(Column::ResourceId.eq(uid.as_str())),
        )
        .exec(db)
        .await?;

    tracing::debug!(%uid, removed = result.rows_affected, "Removed permission edges");
    Ok(result.rows_affected)
}
