//! # User Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::user::{ActiveModel, Column, Entity, Model};

/// Repository for user records. Callers are expected to normalize emails
/// before lookups; see [`crate::normalization::normalize_email`].
pub struct UserRepository {
    db: DatabaseConnection,
}

impl UserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Email.eq(email))
            .one(&self.db)
            .await
    }

    pub async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Model>, DbErr> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::Id.is_in(ids.to_vec()))
            .all(&self.db)
            .await
    }

    /// Find a user by normalized email, creating the record when missing.
    pub async fn get_or_create(&self, email: &str) -> Result<Model, DbErr> {
        if let Some(existing) = self.find_by_email(email).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let created = ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(user_id = %created.id, "User registered");

        Ok(created)
    }
}
