//! # Data Models
//!
//! SeaORM entities for the review orchestration service, plus the workflow
//! state enums shared across the crate.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod git_repository;
pub mod pull_request;
pub mod review;
pub mod state;
pub mod telegram_user;
pub mod user;

pub use git_repository::Entity as GitRepository;
pub use pull_request::Entity as PullRequest;
pub use review::Entity as Review;
pub use state::{PullRequestState, ReviewState, StateParseError};
pub use telegram_user::Entity as TelegramUser;
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "reviewbot".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
