//! # TelegramUser Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ModelTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::telegram_user::{ActiveModel, Column, Entity, Model};

/// Repository for Telegram identity records.
pub struct TelegramUserRepository {
    db: DatabaseConnection,
}

impl TelegramUserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Username.eq(username))
            .one(&self.db)
            .await
    }

    pub async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .one(&self.db)
            .await
    }

    pub async fn find_by_chat_id(&self, chat_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::ChatId.eq(chat_id))
            .one(&self.db)
            .await
    }

    pub async fn create(
        &self,
        username: &str,
        chat_id: Option<i64>,
        user_id: Option<Uuid>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let created = ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username.to_string()),
            chat_id: Set(chat_id),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            telegram_user_id = %created.id,
            username = %username,
            "Telegram user registered"
        );

        Ok(created)
    }

    /// Update the mutable fields of a Telegram identity.
    pub async fn update(
        &self,
        record: Model,
        username: Option<&str>,
        chat_id: Option<Option<i64>>,
        user_id: Option<Option<Uuid>>,
    ) -> Result<Model, DbErr> {
        let mut active: ActiveModel = record.into();
        if let Some(username) = username {
            active.username = Set(username.to_string());
        }
        if let Some(chat_id) = chat_id {
            active.chat_id = Set(chat_id);
        }
        if let Some(user_id) = user_id {
            active.user_id = Set(user_id);
        }
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    pub async fn delete_by_chat_id(&self, chat_id: i64) -> Result<bool, DbErr> {
        match self.find_by_chat_id(chat_id).await? {
            Some(record) => {
                record.delete(&self.db).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
