//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! service entities. Relations are loaded explicitly through the graph
//! methods rather than traversed through the ORM.

pub mod git_repository;
pub mod pull_request;
pub mod review;
pub mod telegram_user;
pub mod user;

pub use git_repository::GitRepositoryRepository;
pub use pull_request::{PullRequestGraph, PullRequestRepository};
pub use review::ReviewRepository;
pub use telegram_user::TelegramUserRepository;
pub use user::UserRepository;
