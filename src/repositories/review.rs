//! # Review Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ModelTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::review::{ActiveModel, Column, Entity, Model};
use crate::models::{PullRequestState, ReviewState, pull_request};

/// Repository for review records.
pub struct ReviewRepository {
    db: DatabaseConnection,
}

impl ReviewRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_pair(
        &self,
        pull_request_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::PullRequestId.eq(pull_request_id))
            .filter(Column::UserId.eq(user_id))
            .one(&self.db)
            .await
    }

    pub async fn list_by_pull_request(&self, pull_request_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::PullRequestId.eq(pull_request_id))
            .all(&self.db)
            .await
    }

    /// Create a review for the pair in the given state, unless one already
    /// exists.
    pub async fn get_or_create(
        &self,
        pull_request_id: Uuid,
        user_id: Uuid,
        state: ReviewState,
    ) -> Result<Model, DbErr> {
        if let Some(existing) = self.find_by_pair(pull_request_id, user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let created = ActiveModel {
            id: Set(Uuid::new_v4()),
            pull_request_id: Set(pull_request_id),
            user_id: Set(user_id),
            state: Set(state.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            review_id = %created.id,
            pull_request_id = %pull_request_id,
            user_id = %user_id,
            "Review created"
        );

        Ok(created)
    }

    /// Transition a review to a new state, refreshing `updated_at`.
    pub async fn set_state(&self, record: Model, state: ReviewState) -> Result<Model, DbErr> {
        let mut active: ActiveModel = record.into();
        active.state = Set(state.as_str().to_string());
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Move every review on a pull request to the given state.
    pub async fn set_state_for_pull_request(
        &self,
        pull_request_id: Uuid,
        state: ReviewState,
    ) -> Result<Vec<Model>, DbErr> {
        let reviews = self.list_by_pull_request(pull_request_id).await?;
        let mut updated = Vec::with_capacity(reviews.len());
        for review in reviews {
            updated.push(self.set_state(review, state).await?);
        }
        Ok(updated)
    }

    /// Hard-delete a review (reviewer unassigned).
    pub async fn delete(&self, record: Model) -> Result<(), DbErr> {
        record.delete(&self.db).await?;
        Ok(())
    }

    /// The given user's `pending` reviews on pull requests with an active
    /// review round, paired with those pull requests.
    pub async fn list_pending_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(Model, pull_request::Model)>, DbErr> {
        let rows = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::State.eq(ReviewState::Pending.as_str()))
            .find_also_related(pull_request::Entity)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(review, pr)| pr.map(|pr| (review, pr)))
            .filter(|(_, pr)| {
                matches!(
                    pr.state.parse::<PullRequestState>(),
                    Ok(PullRequestState::Pending
                        | PullRequestState::Approved
                        | PullRequestState::Declined)
                )
            })
            .collect())
    }

    /// All `pending` reviews paired with their pull requests, for the
    /// scheduled weekday ping.
    pub async fn list_pending(&self) -> Result<Vec<(Model, pull_request::Model)>, DbErr> {
        let rows = Entity::find()
            .filter(Column::State.eq(ReviewState::Pending.as_str()))
            .find_also_related(pull_request::Entity)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(review, pr)| pr.map(|pr| (review, pr)))
            .collect())
    }
}
