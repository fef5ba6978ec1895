//! # PullRequest Repository
//!
//! Includes [`PullRequestGraph`], the explicit load of a pull request with
//! its repository, author and reviews; command handlers re-read the graph
//! at entry instead of traversing ORM relations lazily.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::pull_request::{ActiveModel, Column, Entity, Model};
use crate::models::{PullRequestState, git_repository, review, user};

/// A pull request together with everything the workflow needs to decide a
/// command: its repository, its author (if resolved) and all review rows.
#[derive(Debug, Clone)]
pub struct PullRequestGraph {
    pub pull_request: Model,
    pub repository: git_repository::Model,
    pub author: Option<user::Model>,
    pub reviews: Vec<review::Model>,
}

/// Repository for pull request records.
pub struct PullRequestRepository {
    db: DatabaseConnection,
}

impl PullRequestRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_external_id(
        &self,
        git_repository_id: Uuid,
        external_id: i64,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::GitRepositoryId.eq(git_repository_id))
            .filter(Column::ExternalId.eq(external_id))
            .one(&self.db)
            .await
    }

    pub async fn create(
        &self,
        git_repository_id: Uuid,
        external_id: i64,
        title: &str,
        link: &str,
        author_user_id: Option<Uuid>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let created = ActiveModel {
            id: Set(Uuid::new_v4()),
            git_repository_id: Set(git_repository_id),
            external_id: Set(external_id),
            title: Set(title.to_string()),
            link: Set(link.to_string()),
            author_user_id: Set(author_user_id),
            state: Set(PullRequestState::Idle.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            pull_request_id = %created.id,
            external_id = external_id,
            "Pull request registered"
        );

        Ok(created)
    }

    /// Transition a pull request to a new state, refreshing `updated_at`.
    pub async fn set_state(&self, record: Model, state: PullRequestState) -> Result<Model, DbErr> {
        let mut active: ActiveModel = record.into();
        active.state = Set(state.as_str().to_string());
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Refresh the provider-sourced fields after a `modified` event.
    pub async fn update_details(
        &self,
        record: Model,
        title: &str,
        link: &str,
    ) -> Result<Model, DbErr> {
        let mut active: ActiveModel = record.into();
        active.title = Set(title.to_string());
        active.link = Set(link.to_string());
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Load a pull request with its repository, author and reviews.
    pub async fn load_graph(
        &self,
        git_repository_id: Uuid,
        external_id: i64,
    ) -> Result<Option<PullRequestGraph>, DbErr> {
        let Some(pull_request) = self
            .find_by_external_id(git_repository_id, external_id)
            .await?
        else {
            return Ok(None);
        };

        let Some(repository) = git_repository::Entity::find_by_id(git_repository_id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let author = match pull_request.author_user_id {
            Some(author_id) => user::Entity::find_by_id(author_id).one(&self.db).await?,
            None => None,
        };

        let reviews = review::Entity::find()
            .filter(review::Column::PullRequestId.eq(pull_request.id))
            .all(&self.db)
            .await?;

        Ok(Some(PullRequestGraph {
            pull_request,
            repository,
            author,
            reviews,
        }))
    }
}
