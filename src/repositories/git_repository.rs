//! # GitRepository Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::git_repository::{ActiveModel, Column, Entity, Model};

/// Repository for git repository records.
pub struct GitRepositoryRepository {
    db: DatabaseConnection,
}

impl GitRepositoryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Find a repository by its provider coordinates.
    pub async fn find(
        &self,
        kind: &str,
        project: &str,
        slug: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Kind.eq(kind))
            .filter(Column::Project.eq(project))
            .filter(Column::Slug.eq(slug))
            .one(&self.db)
            .await
    }

    /// Find a repository by coordinates, creating it when missing.
    pub async fn get_or_create(
        &self,
        kind: &str,
        project: &str,
        slug: &str,
    ) -> Result<Model, DbErr> {
        if let Some(existing) = self.find(kind, project, slug).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let created = ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind.to_string()),
            project: Set(project.to_string()),
            slug: Set(slug.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            repository_id = %created.id,
            project = %project,
            slug = %slug,
            "Git repository registered"
        );

        Ok(created)
    }
}
