//! PullRequest entity model
//!
//! One row per provider-side pull request, unique within its repository by
//! the provider's numeric id. `state` holds the aggregate review state; see
//! [`crate::models::state::PullRequestState`].

use super::git_repository::Entity as GitRepository;
use super::user::Entity as User;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pull_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub git_repository_id: Uuid,

    /// Provider-side pull request id.
    pub external_id: i64,

    pub title: String,

    /// Browser link to the pull request.
    pub link: String,

    /// Author, once resolved to a user record.
    pub author_user_id: Option<Uuid>,

    /// Aggregate state as TEXT, parsed via `PullRequestState`.
    pub state: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "GitRepository",
        from = "Column::GitRepositoryId",
        to = "super::git_repository::Column::Id"
    )]
    GitRepository,
    #[sea_orm(
        belongs_to = "User",
        from = "Column::AuthorUserId",
        to = "super::user::Column::Id"
    )]
    Author,
    #[sea_orm(has_many = "super::review::Entity")]
    Review,
}

impl Related<GitRepository> for Entity {
    fn to() -> RelationDef {
        Relation::GitRepository.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Review.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
