//! Database migrations for the review orchestration service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_06_01_000001_create_users;
mod m2024_06_01_000002_create_telegram_users;
mod m2024_06_01_000003_create_git_repositories;
mod m2024_06_01_000004_create_pull_requests;
mod m2024_06_01_000005_create_reviews;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_06_01_000001_create_users::Migration),
            Box::new(m2024_06_01_000002_create_telegram_users::Migration),
            Box::new(m2024_06_01_000003_create_git_repositories::Migration),
            Box::new(m2024_06_01_000004_create_pull_requests::Migration),
            Box::new(m2024_06_01_000005_create_reviews::Migration),
        ]
    }
}
