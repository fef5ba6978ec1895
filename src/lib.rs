//! # Review Bot Library
//!
//! Core functionality for the review orchestration service: the review
//! workflow state machine, reviewer selection, persistence, and the webhook
//! surface that drives them.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalization;
pub mod repositories;
pub mod review;
pub mod scheduler;
pub mod scm;
pub mod server;
pub mod telegram;
pub mod telemetry;
pub use migration;
