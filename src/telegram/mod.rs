//! # Telegram notifications and bot commands
//!
//! Message builders are pure functions so the workflow tests can assert on
//! content without a transport. [`TelegramNotifier`] delivers messages over
//! the Bot API `sendMessage` endpoint; [`TelegramService`] implements the
//! bot's own webhook commands (start, stop, `/pending`).

use std::time::Duration;

use reqwest::Client;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::repositories::{ReviewRepository, TelegramUserRepository};

/// Sent in reply to `/pending` when the user has nothing waiting.
pub const NO_PENDING_MESSAGE: &str = "You have no reviews waiting. 🎉";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("request to Telegram failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram returned status {status}")]
    UnexpectedStatus { status: u16 },
}

/// Errors from bot webhook operations.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("database operation failed: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

pub fn review_requested_message(title: &str, link: &str) -> String {
    format!("You have been asked to review a pull request:\n<a href=\"{link}\">{title}</a>")
}

pub fn ping_message(title: &str, link: &str, days: i64) -> String {
    let mut message =
        format!("A pull request is still waiting for your review:\n<a href=\"{link}\">{title}</a>");
    if days > 0 {
        message.push_str(&format!(
            "\nIt has been waiting for {days} day(s) {}",
            escalation_emoji(days)
        ));
    }
    message
}

pub fn needs_work_message(title: &str, link: &str) -> String {
    format!("A reviewer has requested changes ❌:\n<a href=\"{link}\">{title}</a>")
}

pub fn approved_message(title: &str, link: &str) -> String {
    format!("Your pull request has been approved ✅:\n<a href=\"{link}\">{title}</a>")
}

pub fn author_fixed_message(title: &str, link: &str) -> String {
    format!("The author has addressed the review comments 🛠:\n<a href=\"{link}\">{title}</a>")
}

pub fn pending_list_message(items: &[(String, String)]) -> String {
    let mut message = String::from("Reviews waiting for you:");
    for (title, link) in items {
        message.push_str(&format!("\n• <a href=\"{link}\">{title}</a>"));
    }
    message
}

fn escalation_emoji(days: i64) -> &'static str {
    match days {
        1 => "😐",
        2 => "😕",
        3 => "😟",
        4 => "😠",
        _ => "🤬",
    }
}

/// Bot API message sender. Addressing requires the recipient's numeric chat
/// id, known once the bot has observed a start event from them.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Deliver one HTML-formatted message to a chat.
    pub async fn send(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        debug!(chat_id, "Sending Telegram message");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelegramError::UnexpectedStatus {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/// Handlers for the bot's own webhook: membership transitions and the
/// `/pending` command.
#[derive(Clone)]
pub struct TelegramService {
    db: DatabaseConnection,
    notifier: TelegramNotifier,
}

impl TelegramService {
    pub fn new(db: DatabaseConnection, notifier: TelegramNotifier) -> Self {
        Self { db, notifier }
    }

    fn telegram_users(&self) -> TelegramUserRepository {
        TelegramUserRepository::new(self.db.clone())
    }

    /// A user started the bot: remember their chat id so notifications can
    /// be addressed to them.
    pub async fn bot_start(&self, chat_id: i64, username: &str) -> Result<(), DbErr> {
        let repository = self.telegram_users();

        if let Some(record) = repository.find_by_chat_id(chat_id).await? {
            if record.username != username {
                repository.update(record, Some(username), None, None).await?;
            }
            return Ok(());
        }

        if let Some(record) = repository.find_by_username(username).await? {
            repository.update(record, None, Some(Some(chat_id)), None).await?;
            info!(username, chat_id, "Telegram chat linked");
            return Ok(());
        }

        repository.create(username, Some(chat_id), None).await?;
        Ok(())
    }

    /// A user blocked or removed the bot: forget the identity.
    pub async fn bot_stop(&self, chat_id: i64) -> Result<(), DbErr> {
        let removed = self.telegram_users().delete_by_chat_id(chat_id).await?;
        if removed {
            info!(chat_id, "Telegram chat unlinked");
        }
        Ok(())
    }

    /// Reply to `/pending` with the user's pending reviews on pull requests
    /// with an active review round.
    pub async fn pending(&self, chat_id: i64) -> Result<(), BotError> {
        let Some(identity) = self.telegram_users().find_by_chat_id(chat_id).await? else {
            self.notifier.send(chat_id, NO_PENDING_MESSAGE).await?;
            return Ok(());
        };

        let Some(user_id) = identity.user_id else {
            self.notifier.send(chat_id, NO_PENDING_MESSAGE).await?;
            return Ok(());
        };

        let pending = ReviewRepository::new(self.db.clone())
            .list_pending_for_user(user_id)
            .await?;

        if pending.is_empty() {
            self.notifier.send(chat_id, NO_PENDING_MESSAGE).await?;
            return Ok(());
        }

        let items: Vec<(String, String)> = pending
            .into_iter()
            .map(|(_, pull_request)| (pull_request.title, pull_request.link))
            .collect();

        if let Err(err) = self.notifier.send(chat_id, &pending_list_message(&items)).await {
            warn!(error = %err, chat_id, "Failed to send pending-review list");
        }

        Ok(())
    }
}
