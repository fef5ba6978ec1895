//! Migration to create the pull_requests table.
//!
//! A pull request is identified within its repository by the provider-side
//! numeric id; the row carries the aggregate review state.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::GitRepositoryId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ExternalId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PullRequests::Title).text().not_null())
                    .col(ColumnDef::new(PullRequests::Link).text().not_null())
                    .col(ColumnDef::new(PullRequests::AuthorUserId).uuid().null())
                    .col(
                        ColumnDef::new(PullRequests::State)
                            .text()
                            .not_null()
                            .default("idle"),
                    )
                    .col(
                        ColumnDef::new(PullRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PullRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pull_requests_git_repository_id")
                            .from(PullRequests::Table, PullRequests::GitRepositoryId)
                            .to(GitRepositories::Table, GitRepositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pull_requests_author_user_id")
                            .from(PullRequests::Table, PullRequests::AuthorUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_repository_external")
                    .table(PullRequests::Table)
                    .col(PullRequests::GitRepositoryId)
                    .col(PullRequests::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_state")
                    .table(PullRequests::Table)
                    .col(PullRequests::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_pull_requests_repository_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_pull_requests_state").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PullRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PullRequests {
    Table,
    Id,
    GitRepositoryId,
    ExternalId,
    Title,
    Link,
    AuthorUserId,
    State,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum GitRepositories {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
