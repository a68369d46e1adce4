use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PermissionEdges::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PermissionEdges::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PermissionEdges::SubjectId).string().not_null())
                    .col(ColumnDef::new(PermissionEdges::ResourceId).string().not_null())
                    .col(ColumnDef::new(PermissionEdges::SubjectType).string().not_null())
                    .col(ColumnDef::new(PermissionEdges::ResourceType).string().not_null())
                    .col(
                        ColumnDef::new(PermissionEdges::Access)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(ColumnDef::new(PermissionEdges::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(PermissionEdges::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        // One edge per (subject, resource); concurrent first upserts race on this
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_permission_edges_subject_resource")
                    .table(PermissionEdges::Table)
                    .col(PermissionEdges::SubjectId)
                    .col(PermissionEdges::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_permission_edges_resource")
                    .table(PermissionEdges::Table)
                    .col(PermissionEdges::ResourceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_permission_edges_resource_type")
                    .table(PermissionEdges::Table)
                    .col(PermissionEdges::ResourceType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PermissionEdges::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PermissionEdges {
    Table,
    Id,
    SubjectId,
    ResourceId,
    SubjectType,
    ResourceType,
    Access,
    CreatedAt,
    UpdatedAt,
}
