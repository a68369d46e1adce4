use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "permission_edges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subject_id: String,
    pub resource_id: String,
    pub subject_type: String,
    pub resource_type: String,
    pub access: String, // JSON-encoded {permission: bool}
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
