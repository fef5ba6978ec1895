//! Review orchestration: the workflow command handlers, the per-repository
//! policy resolver and the reviewer selection engine.

pub mod commands;
pub mod config;
pub mod selection;

pub use commands::{AssignParams, CommandError, OpenParams, ReviewCommands};
pub use config::{AllowedUser, CodeReviewConfig, NotificationChannel, parse_code_review_config};
