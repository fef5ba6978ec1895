//! # Telegram bot webhook
//!
//! Receives Bot API updates: private-chat membership transitions link or
//! unlink a chat id, and the `/pending` command lists the sender's open
//! reviews.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatDto {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct SenderDto {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMemberDto {
    pub status: String,
}

/// `my_chat_member`: the bot's own membership in a chat changed.
#[derive(Debug, Deserialize)]
pub struct ChatMemberUpdateDto {
    pub chat: ChatDto,
    pub from: SenderDto,
    pub new_chat_member: ChatMemberDto,
}

#[derive(Debug, Deserialize)]
pub struct MessageDto {
    pub chat: ChatDto,
    pub text: Option<String>,
}

/// Bot API update envelope, limited to the fields the bot acts on.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub message: Option<MessageDto>,
    pub my_chat_member: Option<ChatMemberUpdateDto>,
}

/// Accept a Telegram Bot API update
#[utoipa::path(
    post,
    path = "/api/telegram/webhook",
    request_body(content = serde_json::Value, description = "Bot API update", content_type = "application/json"),
    responses(
        (status = 200, description = "Update processed or ignored"),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn telegram_webhook(
    State(state): State<AppState>,
    Json(update): Json<TelegramUpdate>,
) -> Result<&'static str, ApiError> {
    if let Some(transition) = update.my_chat_member {
        if transition.chat.kind != "private" {
            debug!(chat = transition.chat.id, "Ignoring non-private chat transition");
            return Ok("ok");
        }

        let Some(username) = transition.from.username else {
            debug!(chat = transition.chat.id, "Chat transition without username; ignoring");
            return Ok("ok");
        };

        match transition.new_chat_member.status.as_str() {
            "member" => {
                state
                    .telegram
                    .bot_start(transition.chat.id, &username)
                    .await
                    .map_err(ApiError::from)?;
            }
            "kicked" => {
                state
                    .telegram
                    .bot_stop(transition.chat.id)
                    .await
                    .map_err(ApiError::from)?;
            }
            other => {
                debug!(status = %other, "Unhandled chat member status");
            }
        }

        return Ok("ok");
    }

    if let Some(message) = update.message {
        if message.chat.kind != "private" {
            return Ok("ok");
        }

        if message.text.as_deref().map(str::trim) == Some("/pending") {
            state.telegram.pending(message.chat.id).await?;
        }
    }

    Ok("ok")
}
