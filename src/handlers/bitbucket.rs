//! # Bitbucket webhook intake
//!
//! Translates Bitbucket Server webhook payloads into review workflow
//! commands. The DTOs mirror the provider's JSON; everything the workflow
//! does not need is left unmodeled. Handled events always reply `"ok"` so
//! the provider does not retry deliveries the workflow already reported
//! through pull-request comments.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::review::{AssignParams, OpenParams};
use crate::server::AppState;

const EVENT_KEY_HEADER: &str = "X-Event-Key";

/// Bitbucket user, as embedded in authors, reviewers and participants.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub name: Option<String>,
    pub email_address: Option<String>,
}

/// A user wrapped in a participant envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantDto {
    pub user: UserDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDto {
    pub href: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksDto {
    #[serde(default)]
    pub clone: Vec<LinkDto>,
    #[serde(rename = "self", default)]
    pub self_links: Vec<LinkDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDto {
    pub slug: String,
    pub project: ProjectDto,
    #[serde(default)]
    pub links: LinksDto,
}

/// One side of the pull request (source or destination branch).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefDto {
    pub display_id: String,
    pub repository: RepositoryDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDto {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub links: LinksDto,
    pub author: Option<ParticipantDto>,
    pub from_ref: RefDto,
    pub to_ref: RefDto,
    #[serde(default)]
    pub reviewers: Vec<ParticipantDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentDto {
    pub text: String,
}

/// The union of every pull-request webhook shape the workflow handles.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketWebhook {
    pub event_key: Option<String>,
    pub pull_request: Option<PullRequestDto>,
    #[serde(default)]
    pub added_reviewers: Vec<UserDto>,
    #[serde(default)]
    pub removed_reviewers: Vec<UserDto>,
    pub participant: Option<ParticipantDto>,
    pub comment: Option<CommentDto>,
}

impl PullRequestDto {
    fn project(&self) -> &str {
        &self.to_ref.repository.project.key
    }

    fn repository(&self) -> &str {
        &self.to_ref.repository.slug
    }

    fn link(&self) -> String {
        self.links
            .self_links
            .first()
            .map(|link| link.href.clone())
            .unwrap_or_default()
    }

    fn author_email(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|author| author.user.email_address.as_deref())
    }

    fn assign_params(&self) -> Option<AssignParams> {
        Some(AssignParams {
            project: self.project().to_string(),
            repository: self.repository().to_string(),
            pull_request_id: self.id,
            author_email: self.author_email()?.to_string(),
            branch: self.from_ref.display_id.clone(),
            from_link: clone_link(&self.from_ref.repository)?,
            to_link: clone_link(&self.to_ref.repository)?,
        })
    }
}

/// The http clone URL of a repository, falling back to the first link.
fn clone_link(repository: &RepositoryDto) -> Option<String> {
    repository
        .links
        .clone
        .iter()
        .find(|link| link.name.as_deref() == Some("http"))
        .or_else(|| repository.links.clone.first())
        .map(|link| link.href.clone())
}

/// Accept a Bitbucket Server webhook event
///
/// Routes pull-request lifecycle events and slash-commands in comments to
/// the review workflow. The `diagnostics:ping` event (Bitbucket's webhook
/// test button) short-circuits with an acknowledgement.
#[utoipa::path(
    post,
    path = "/api/scm/bitbucket/webhook",
    request_body(content = JsonValue, description = "Bitbucket webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed or ignored"),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn bitbucket_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<&'static str, ApiError> {
    let event_key = headers
        .get(EVENT_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            payload
                .get("eventKey")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    counter!("webhook_events_total", "event" => event_key.clone()).increment(1);
    debug!(event = %event_key, "Bitbucket webhook received");

    if event_key == "diagnostics:ping" {
        return Ok("ok");
    }

    let webhook: BitbucketWebhook = serde_json::from_value(payload).map_err(|err| {
        ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            &format!("Invalid webhook payload: {err}"),
        )
    })?;

    let Some(pull_request) = webhook.pull_request else {
        debug!(event = %event_key, "Webhook without pull request; ignoring");
        return Ok("ok");
    };

    let commands = &state.commands;
    let project = pull_request.project().to_string();
    let repository = pull_request.repository().to_string();
    let id = pull_request.id;

    match event_key.as_str() {
        "pr:opened" => {
            let Some(author_email) = pull_request.author_email() else {
                warn!("Opened pull request without author email; ignoring");
                return Ok("ok");
            };
            let reviewer_emails = pull_request
                .reviewers
                .iter()
                .filter_map(|reviewer| reviewer.user.email_address.clone())
                .collect();

            let (Some(from_link), Some(to_link)) = (
                clone_link(&pull_request.from_ref.repository),
                clone_link(&pull_request.to_ref.repository),
            ) else {
                warn!("Opened pull request without clone links; ignoring");
                return Ok("ok");
            };

            commands
                .open(OpenParams {
                    project,
                    repository,
                    pull_request_id: id,
                    author_email: author_email.to_string(),
                    branch: pull_request.from_ref.display_id.clone(),
                    title: pull_request.title.clone(),
                    link: pull_request.link(),
                    from_link,
                    to_link,
                    reviewer_emails,
                })
                .await?;
        }
        "pr:declined" | "pr:deleted" | "pr:merged" => {
            commands.close(&project, &repository, id).await?;
        }
        "pr:modified" => {
            commands
                .modified(&project, &repository, id, &pull_request.title)
                .await?;
        }
        "pr:reviewer:updated" => {
            for user in &webhook.added_reviewers {
                if let Some(email) = &user.email_address {
                    commands.add(&project, &repository, id, email).await?;
                }
            }
            for user in &webhook.removed_reviewers {
                if let Some(email) = &user.email_address {
                    commands.remove(&project, &repository, id, email).await?;
                }
            }
        }
        "pr:reviewer:needs_work" => {
            if let Some(email) = participant_email(&webhook.participant) {
                commands.declined(&project, &repository, id, email).await?;
            }
        }
        "pr:reviewer:approved" => {
            if let Some(email) = participant_email(&webhook.participant) {
                commands.approved(&project, &repository, id, email).await?;
            }
        }
        "pr:comment:added" => {
            let Some(comment) = &webhook.comment else {
                return Ok("ok");
            };
            match comment.text.trim() {
                "/assign" => {
                    if let Some(params) = pull_request.assign_params() {
                        commands.assign(params).await?;
                    }
                }
                "/start" => commands.start(&project, &repository, id).await?,
                "/stop" => commands.stop(&project, &repository, id).await?,
                "/restart" => commands.restart(&project, &repository, id).await?,
                "/ping" => commands.ping(&project, &repository, id).await?,
                "/fixed" => commands.fixed(&project, &repository, id).await?,
                other => {
                    debug!(text = %other, "Comment is not a workflow command; ignoring");
                }
            }
        }
        other => {
            debug!(event = %other, "Unhandled Bitbucket event");
        }
    }

    Ok("ok")
}

fn participant_email(participant: &Option<ParticipantDto>) -> Option<&str> {
    participant
        .as_ref()
        .and_then(|participant| participant.user.email_address.as_deref())
}
