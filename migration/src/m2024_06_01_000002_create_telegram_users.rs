//! Migration to create the telegram_users table.
//!
//! Telegram identities are tracked separately from users: a row may exist
//! before a chat id is known (reviewer named in config) or before it is
//! linked to a user (someone who started the bot first).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TelegramUsers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TelegramUsers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TelegramUsers::Username).text().not_null())
                    .col(ColumnDef::new(TelegramUsers::ChatId).big_integer().null())
                    .col(ColumnDef::new(TelegramUsers::UserId).uuid().null())
                    .col(
                        ColumnDef::new(TelegramUsers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TelegramUsers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_telegram_users_user_id")
                            .from(TelegramUsers::Table, TelegramUsers::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // One telegram identity per user.
        manager
            .create_index(
                Index::create()
                    .name("idx_telegram_users_user_id")
                    .table(TelegramUsers::Table)
                    .col(TelegramUsers::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_telegram_users_username")
                    .table(TelegramUsers::Table)
                    .col(TelegramUsers::Username)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_telegram_users_user_id").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_telegram_users_username")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TelegramUsers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TelegramUsers {
    Table,
    Id,
    Username,
    ChatId,
    UserId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
