//! Migration to create the git_repositories table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GitRepositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GitRepositories::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GitRepositories::Kind).text().not_null())
                    .col(ColumnDef::new(GitRepositories::Project).text().not_null())
                    .col(ColumnDef::new(GitRepositories::Slug).text().not_null())
                    .col(
                        ColumnDef::new(GitRepositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GitRepositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_git_repositories_kind_project_slug")
                    .table(GitRepositories::Table)
                    .col(GitRepositories::Kind)
                    .col(GitRepositories::Project)
                    .col(GitRepositories::Slug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_git_repositories_kind_project_slug")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(GitRepositories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GitRepositories {
    Table,
    Id,
    Kind,
    Project,
    Slug,
    CreatedAt,
    UpdatedAt,
}
