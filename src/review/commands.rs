//! # Review workflow commands
//!
//! The state machine behind the webhook surface. Each command re-reads the
//! persisted pull-request graph, validates its precondition and applies the
//! transition. Unknown repositories, unknown pull requests and precondition
//! violations are reported as pull-request comments and the command returns
//! `Ok(())`; only infrastructure failures surface as errors.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{PullRequestState, ReviewState, review, user};
use crate::normalization::{normalize_email, username_from_email};
use crate::repositories::{
    GitRepositoryRepository, PullRequestGraph, PullRequestRepository, ReviewRepository,
    TelegramUserRepository, UserRepository,
};
use crate::review::config::{
    AllowedUser, CONFIG_FILE_PATH, CodeReviewConfig, NotificationChannel,
    parse_code_review_config,
};
use crate::review::selection::{self, SelectionError};
use crate::scm::{BitbucketClient, CloneRequest, RepositorySnapshot, ScmError, SnapshotError};
use crate::telegram::{self, TelegramNotifier};

/// Provider discriminator stored on every repository row.
pub const PROVIDER_KIND: &str = "bitbucket";

const REPOSITORY_NOT_REGISTERED: &str =
    "This repository is not registered for review orchestration.";
const PULL_REQUEST_NOT_REGISTERED: &str =
    "This pull request is not registered for review orchestration.";
const INVALID_STATE: &str =
    "The pull request is in a state that does not allow this command.";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("database operation failed: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Scm(#[from] ScmError),
}

/// Failures inside the detached assignment flow; reported back through a
/// pull-request comment, never to the triggering request.
#[derive(Debug, Error)]
enum AssignError {
    #[error("database operation failed: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Scm(#[from] ScmError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Everything the `opened` webhook carries.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub project: String,
    pub repository: String,
    pub pull_request_id: i64,
    pub author_email: String,
    pub branch: String,
    pub title: String,
    pub link: String,
    pub from_link: String,
    pub to_link: String,
    pub reviewer_emails: Vec<String>,
}

/// Inputs of the assignment flow.
#[derive(Debug, Clone)]
pub struct AssignParams {
    pub project: String,
    pub repository: String,
    pub pull_request_id: i64,
    pub author_email: String,
    pub branch: String,
    pub from_link: String,
    pub to_link: String,
}

/// The review workflow state machine.
#[derive(Clone)]
pub struct ReviewCommands {
    db: DatabaseConnection,
    config: Arc<AppConfig>,
    scm: BitbucketClient,
    notifier: TelegramNotifier,
}

impl ReviewCommands {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<AppConfig>,
        scm: BitbucketClient,
        notifier: TelegramNotifier,
    ) -> Self {
        Self {
            db,
            config,
            scm,
            notifier,
        }
    }

    fn git_repositories(&self) -> GitRepositoryRepository {
        GitRepositoryRepository::new(self.db.clone())
    }

    fn users(&self) -> UserRepository {
        UserRepository::new(self.db.clone())
    }

    fn telegram_users(&self) -> TelegramUserRepository {
        TelegramUserRepository::new(self.db.clone())
    }

    fn pull_requests(&self) -> PullRequestRepository {
        PullRequestRepository::new(self.db.clone())
    }

    fn reviews(&self) -> ReviewRepository {
        ReviewRepository::new(self.db.clone())
    }

    /// A pull request was opened (or re-opened). Registers the repository,
    /// author and pull request, then kicks off reviewer assignment per the
    /// repository policy.
    #[instrument(skip_all, fields(project = %params.project, repository = %params.repository, pull_request = params.pull_request_id))]
    pub async fn open(&self, params: OpenParams) -> Result<(), CommandError> {
        let repository = self
            .git_repositories()
            .get_or_create(PROVIDER_KIND, &params.project, &params.repository)
            .await?;
        let author = self
            .users()
            .get_or_create(&normalize_email(&params.author_email))
            .await?;

        let pull_requests = self.pull_requests();
        match pull_requests
            .find_by_external_id(repository.id, params.pull_request_id)
            .await?
        {
            Some(existing) => {
                let state = parse_pull_request_state(&existing.state);
                if state != PullRequestState::Idle {
                    info!(prior_state = %existing.state, "Re-opening pull request");
                    let refreshed = pull_requests
                        .update_details(existing, &params.title, &params.link)
                        .await?;
                    pull_requests
                        .set_state(refreshed, PullRequestState::Idle)
                        .await?;
                }
            }
            None => {
                pull_requests
                    .create(
                        repository.id,
                        params.pull_request_id,
                        &params.title,
                        &params.link,
                        Some(author.id),
                    )
                    .await?;
            }
        }

        let config = self.fetch_config(&params.project, &params.repository).await;
        self.reconcile_allowed_users(&config.allowed_users).await?;

        if !params.reviewer_emails.is_empty() {
            let Some(graph) = pull_requests
                .load_graph(repository.id, params.pull_request_id)
                .await?
            else {
                return Ok(());
            };

            let mut seen = HashSet::new();
            for email in &params.reviewer_emails {
                let email = normalize_email(email);
                if !seen.insert(email.clone()) {
                    continue;
                }
                let reviewer = self.users().get_or_create(&email).await?;
                self.add_reviewer_record(&graph, &reviewer, &config).await?;
            }
        } else if config.auto_assign {
            self.assign(AssignParams {
                project: params.project,
                repository: params.repository,
                pull_request_id: params.pull_request_id,
                author_email: params.author_email,
                branch: params.branch,
                from_link: params.from_link,
                to_link: params.to_link,
            })
            .await?;
        }

        Ok(())
    }

    /// The pull request was merged, declined or deleted upstream. Reviews
    /// are left untouched so the history stays queryable.
    #[instrument(skip(self))]
    pub async fn close(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !parse_pull_request_state(&graph.pull_request.state).is_active() {
            return Ok(());
        }

        self.pull_requests()
            .set_state(graph.pull_request, PullRequestState::Closed)
            .await?;

        Ok(())
    }

    /// The pull request was edited upstream: refresh the title and
    /// recompute the state from the review set.
    #[instrument(skip(self, title))]
    pub async fn modified(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        title: &str,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !parse_pull_request_state(&graph.pull_request.state).is_active() {
            debug!("Ignoring modification of a closed pull request");
            return Ok(());
        }

        let config = self.fetch_config(project, repository).await;
        let next = recompute_state(&graph.reviews, config.approve_count);

        let pull_requests = self.pull_requests();
        let mut pull_request = graph.pull_request;
        if pull_request.title != title {
            let link = pull_request.link.clone();
            pull_request = pull_requests
                .update_details(pull_request, title, &link)
                .await?;
        }
        pull_requests.set_state(pull_request, next).await?;

        Ok(())
    }

    /// Select and register reviewers for an idle, unassigned pull request.
    /// The git analysis runs detached from the triggering request; failures
    /// are reported as a pull-request comment.
    #[instrument(skip_all, fields(project = %params.project, repository = %params.repository, pull_request = params.pull_request_id))]
    pub async fn assign(&self, params: AssignParams) -> Result<(), CommandError> {
        let Some(graph) = self
            .load_graph(&params.project, &params.repository, params.pull_request_id)
            .await?
        else {
            return Ok(());
        };

        if parse_pull_request_state(&graph.pull_request.state) != PullRequestState::Idle {
            self.comment(&params.project, &params.repository, params.pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        if !graph.reviews.is_empty() {
            self.comment(
                &params.project,
                &params.repository,
                params.pull_request_id,
                "Reviewers are already assigned to this pull request.",
            )
            .await?;
            return Ok(());
        }

        let commands = self.clone();
        tokio::spawn(async move {
            if let Err(err) = commands.run_assignment(&params).await {
                error!(error = %err, "Reviewer assignment failed");
                let text = format!("Reviewer assignment failed:\n```\n{err}\n```");
                if let Err(err) = commands
                    .scm
                    .add_comment(&params.project, &params.repository, params.pull_request_id, &text)
                    .await
                {
                    error!(error = %err, "Failed to report assignment failure");
                }
            }
        });

        Ok(())
    }

    /// The provider reported a reviewer added to the pull request.
    #[instrument(skip(self, email))]
    pub async fn add(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        email: &str,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !parse_pull_request_state(&graph.pull_request.state).is_active() {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let reviewer = self.users().get_or_create(&normalize_email(email)).await?;
        let config = self.fetch_config(project, repository).await;
        self.add_reviewer_record(&graph, &reviewer, &config).await?;

        Ok(())
    }

    /// The provider reported a reviewer removed from the pull request. The
    /// review row is hard-deleted.
    #[instrument(skip(self, email))]
    pub async fn remove(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        email: &str,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !parse_pull_request_state(&graph.pull_request.state).is_active() {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let email = normalize_email(email);
        let reviewer = self.users().get_or_create(&email).await?;

        match graph
            .reviews
            .iter()
            .find(|review| review.user_id == reviewer.id)
        {
            Some(review) => {
                self.reviews().delete(review.clone()).await?;
                info!(reviewer = %email, "Reviewer unassigned");
            }
            None => {
                let username = username_from_email(&email);
                self.comment(
                    project,
                    repository,
                    pull_request_id,
                    &format!("@{username} is not a reviewer of this pull request."),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Start the review round: move idle reviews to `pending` and notify
    /// the reviewers.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if parse_pull_request_state(&graph.pull_request.state) != PullRequestState::Idle {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let config = self.fetch_config(project, repository).await;
        let next = recompute_state(&graph.reviews, config.approve_count);

        let title = graph.pull_request.title.clone();
        let link = graph.pull_request.link.clone();

        self.pull_requests()
            .set_state(graph.pull_request, next)
            .await?;

        for review in &graph.reviews {
            if review.state != ReviewState::Idle.as_str() {
                continue;
            }
            self.reviews()
                .set_state(review.clone(), ReviewState::Pending)
                .await?;
            if config.notification == NotificationChannel::Telegram {
                self.notify_user(
                    review.user_id,
                    &telegram::review_requested_message(&title, &link),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Pause the review round: the pull request and its pending reviews go
    /// back to `idle`. No notifications.
    #[instrument(skip(self))]
    pub async fn stop(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        self.pull_requests()
            .set_state(graph.pull_request, PullRequestState::Idle)
            .await?;

        for review in &graph.reviews {
            if review.state == ReviewState::Pending.as_str() {
                self.reviews()
                    .set_state(review.clone(), ReviewState::Idle)
                    .await?;
            }
        }

        Ok(())
    }

    /// Restart the review round from scratch. Bitbucket cannot reset
    /// another user's verdict directly, so every reviewer is removed from
    /// the participant list and re-added after a settle delay, which lets
    /// the provider accept a fresh verdict from the same identity.
    #[instrument(skip(self))]
    pub async fn restart(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let title = graph.pull_request.title.clone();
        let link = graph.pull_request.link.clone();

        self.pull_requests()
            .set_state(graph.pull_request.clone(), PullRequestState::Pending)
            .await?;
        self.reviews()
            .set_state_for_pull_request(graph.pull_request.id, ReviewState::Pending)
            .await?;

        let config = self.fetch_config(project, repository).await;
        let reviewer_ids: Vec<Uuid> = graph.reviews.iter().map(|review| review.user_id).collect();
        let reviewers = self.users().find_by_ids(&reviewer_ids).await?;

        for reviewer in &reviewers {
            self.scm
                .remove_reviewer(
                    project,
                    repository,
                    pull_request_id,
                    &username_from_email(&reviewer.email),
                )
                .await?;
        }

        tokio::time::sleep(Duration::from_secs(self.config.restart_settle_seconds)).await;

        for reviewer in &reviewers {
            self.scm
                .add_reviewer(
                    project,
                    repository,
                    pull_request_id,
                    &username_from_email(&reviewer.email),
                )
                .await?;
            if config.notification == NotificationChannel::Telegram {
                self.notify_user(reviewer.id, &telegram::review_requested_message(&title, &link))
                    .await?;
            }
        }

        Ok(())
    }

    /// Nudge every reviewer whose review is still `pending`, telling them
    /// how long the pull request has been waiting.
    #[instrument(skip(self))]
    pub async fn ping(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let config = self.fetch_config(project, repository).await;
        if config.notification != NotificationChannel::Telegram {
            return Ok(());
        }

        let now = Utc::now().fixed_offset();
        for review in &graph.reviews {
            if review.state != ReviewState::Pending.as_str() {
                continue;
            }
            let days = (now - review.updated_at).num_days();
            self.notify_user(
                review.user_id,
                &telegram::ping_message(&graph.pull_request.title, &graph.pull_request.link, days),
            )
            .await?;
        }

        Ok(())
    }

    /// The author says review findings are addressed: the round goes back
    /// to `pending` and every reviewer is told, regardless of their own
    /// review state.
    #[instrument(skip(self))]
    pub async fn fixed(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        let title = graph.pull_request.title.clone();
        let link = graph.pull_request.link.clone();

        self.pull_requests()
            .set_state(graph.pull_request.clone(), PullRequestState::Pending)
            .await?;

        let config = self.fetch_config(project, repository).await;
        if config.notification != NotificationChannel::Telegram {
            return Ok(());
        }

        for review in &graph.reviews {
            self.notify_user(review.user_id, &telegram::author_fixed_message(&title, &link))
                .await?;
        }

        Ok(())
    }

    /// A reviewer requested changes. A decline dominates any approval
    /// count: the pull request becomes `declined` unconditionally.
    #[instrument(skip(self, email))]
    pub async fn declined(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        email: &str,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        if let Some(review) = self.find_review_by_email(&graph, email).await? {
            self.reviews()
                .set_state(review, ReviewState::Declined)
                .await?;
        }

        let title = graph.pull_request.title.clone();
        let link = graph.pull_request.link.clone();
        let author = graph.author.clone();

        self.pull_requests()
            .set_state(graph.pull_request, PullRequestState::Declined)
            .await?;

        let config = self.fetch_config(project, repository).await;
        if config.notification == NotificationChannel::Telegram {
            if let Some(author) = author {
                self.notify_user(author.id, &telegram::needs_work_message(&title, &link))
                    .await?;
            }
        }

        Ok(())
    }

    /// A reviewer approved. When the approval count reaches the policy
    /// threshold and the author has a linked Telegram identity on the
    /// telegram channel, the pull request becomes `approved` and the author
    /// is notified. Without such an identity the state is left unchanged
    /// even though the threshold was met; callers rely on `modified` or
    /// `start` to recompute it later.
    #[instrument(skip(self, email))]
    pub async fn approved(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        email: &str,
    ) -> Result<(), CommandError> {
        let Some(graph) = self.load_graph(project, repository, pull_request_id).await? else {
            return Ok(());
        };

        if !active_round(&graph) {
            self.comment(project, repository, pull_request_id, INVALID_STATE)
                .await?;
            return Ok(());
        }

        if let Some(review) = self.find_review_by_email(&graph, email).await? {
            self.reviews()
                .set_state(review, ReviewState::Approved)
                .await?;
        }

        let config = self.fetch_config(project, repository).await;
        let reviews = self.reviews().list_by_pull_request(graph.pull_request.id).await?;
        let approvals = reviews
            .iter()
            .filter(|review| review.state == ReviewState::Approved.as_str())
            .count() as u32;

        if approvals < config.approve_count {
            return Ok(());
        }

        if config.notification != NotificationChannel::Telegram {
            return Ok(());
        }

        let Some(author) = graph.author.clone() else {
            return Ok(());
        };

        let Some(identity) = self.telegram_users().find_by_user_id(author.id).await? else {
            debug!("Approval threshold met but author has no Telegram identity");
            return Ok(());
        };

        let title = graph.pull_request.title.clone();
        let link = graph.pull_request.link.clone();

        self.pull_requests()
            .set_state(graph.pull_request, PullRequestState::Approved)
            .await?;

        match identity.chat_id {
            Some(chat_id) => {
                if let Err(err) = self
                    .notifier
                    .send(chat_id, &telegram::approved_message(&title, &link))
                    .await
                {
                    warn!(error = %err, chat_id, "Failed to send approval notification");
                }
            }
            None => debug!(username = %identity.username, "Author's Telegram chat not started"),
        }

        Ok(())
    }

    /// Materialize the policy's allowed-user list into persisted users and
    /// Telegram identities. Running it twice with the same list performs no
    /// additional writes.
    pub async fn reconcile_allowed_users(
        &self,
        allowed: &[AllowedUser],
    ) -> Result<Vec<user::Model>, CommandError> {
        let users = self.users();
        let telegram_users = self.telegram_users();
        let mut resolved = Vec::with_capacity(allowed.len());

        for entry in allowed {
            let user = users.get_or_create(&normalize_email(&entry.email)).await?;

            if let Some(handle) = &entry.telegram {
                match telegram_users.find_by_user_id(user.id).await? {
                    Some(identity) if identity.username != *handle => {
                        telegram_users
                            .update(identity, Some(handle.as_str()), None, None)
                            .await?;
                    }
                    Some(_) => {}
                    None => match telegram_users.find_by_username(handle).await? {
                        Some(identity) => {
                            telegram_users
                                .update(identity, None, None, Some(Some(user.id)))
                                .await?;
                        }
                        None => {
                            telegram_users.create(handle, None, Some(user.id)).await?;
                        }
                    },
                }
            }

            resolved.push(user);
        }

        Ok(resolved)
    }

    async fn run_assignment(&self, params: &AssignParams) -> Result<(), AssignError> {
        let base_branch = self
            .scm
            .default_branch(&params.project, &params.repository)
            .await?;
        let config = self.fetch_config(&params.project, &params.repository).await;
        let allowed = self.reconcile_allowed_users(&config.allowed_users).await
            .map_err(|err| match err {
                CommandError::Database(err) => AssignError::Database(err),
                CommandError::Scm(err) => AssignError::Scm(err),
            })?;

        let snapshot = RepositorySnapshot::clone_with_remote(&CloneRequest {
            from_link: params.from_link.clone(),
            to_link: params.to_link.clone(),
            base_branch: base_branch.clone(),
            pull_request_branch: params.branch.clone(),
        })
        .await?;

        let git_dir = snapshot.git_dir();
        let files = selection::changed_files(&git_dir, &params.branch, &base_branch).await?;
        let authors = selection::authors_of_files(&git_dir, &files).await?;
        drop(snapshot);

        let candidates =
            selection::weighted_candidates(&config.allowed_users, &authors, &params.author_email);
        let selected = {
            let mut rng = rand::thread_rng();
            selection::draw_reviewers(candidates, config.reviewers_count as usize, &mut rng)
        };

        for email in &selected {
            if !allowed.iter().any(|user| user.email == *email) {
                debug!(reviewer = %email, "Selected reviewer not persisted; skipping");
                continue;
            }
            self.scm
                .add_reviewer(
                    &params.project,
                    &params.repository,
                    params.pull_request_id,
                    &username_from_email(email),
                )
                .await?;
        }

        info!(count = selected.len(), "Reviewers assigned");

        Ok(())
    }

    /// Create the review row for a reviewer, unless they already have one.
    /// New reviews start `idle` while the pull request is idle, `pending`
    /// otherwise; a pending round also notifies the new reviewer.
    async fn add_reviewer_record(
        &self,
        graph: &PullRequestGraph,
        reviewer: &user::Model,
        config: &CodeReviewConfig,
    ) -> Result<(), CommandError> {
        let state = parse_pull_request_state(&graph.pull_request.state);

        if graph
            .reviews
            .iter()
            .any(|review| review.user_id == reviewer.id)
        {
            let username = username_from_email(&reviewer.email);
            self.comment(
                &graph.repository.project,
                &graph.repository.slug,
                graph.pull_request.external_id,
                &format!("@{username} is already a reviewer of this pull request."),
            )
            .await?;
            return Ok(());
        }

        let review_state = if state == PullRequestState::Idle {
            ReviewState::Idle
        } else {
            ReviewState::Pending
        };
        self.reviews()
            .get_or_create(graph.pull_request.id, reviewer.id, review_state)
            .await?;

        if state == PullRequestState::Pending
            && config.notification == NotificationChannel::Telegram
        {
            self.notify_user(
                reviewer.id,
                &telegram::review_requested_message(
                    &graph.pull_request.title,
                    &graph.pull_request.link,
                ),
            )
            .await?;
        }

        Ok(())
    }

    /// Load the pull-request graph, posting the not-registered diagnostics
    /// when the repository or pull request is unknown.
    async fn load_graph(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<Option<PullRequestGraph>, CommandError> {
        let Some(record) = self
            .git_repositories()
            .find(PROVIDER_KIND, project, repository)
            .await?
        else {
            warn!(project, repository, "Command for unregistered repository");
            self.comment(project, repository, pull_request_id, REPOSITORY_NOT_REGISTERED)
                .await?;
            return Ok(None);
        };

        let Some(graph) = self
            .pull_requests()
            .load_graph(record.id, pull_request_id)
            .await?
        else {
            warn!(project, repository, pull_request_id, "Command for unregistered pull request");
            self.comment(project, repository, pull_request_id, PULL_REQUEST_NOT_REGISTERED)
                .await?;
            return Ok(None);
        };

        Ok(Some(graph))
    }

    async fn find_review_by_email(
        &self,
        graph: &PullRequestGraph,
        email: &str,
    ) -> Result<Option<review::Model>, CommandError> {
        let email = normalize_email(email);
        let Some(user) = self.users().find_by_email(&email).await? else {
            return Ok(None);
        };
        Ok(graph
            .reviews
            .iter()
            .find(|review| review.user_id == user.id)
            .cloned())
    }

    async fn fetch_config(&self, project: &str, repository: &str) -> CodeReviewConfig {
        match self.scm.raw_file(project, repository, CONFIG_FILE_PATH).await {
            Ok(content) => parse_code_review_config(&content),
            Err(err) => {
                debug!(error = %err, project, repository, "Review policy not readable; using defaults");
                CodeReviewConfig::default()
            }
        }
    }

    async fn comment(
        &self,
        project: &str,
        repository: &str,
        pull_request_id: i64,
        text: &str,
    ) -> Result<(), CommandError> {
        self.scm
            .add_comment(project, repository, pull_request_id, text)
            .await?;
        Ok(())
    }

    /// Send a Telegram message to a user, skipping quietly when they have
    /// no linked identity or no started chat. Delivery failures are logged,
    /// not propagated; the workflow must not depend on the bot API.
    async fn notify_user(&self, user_id: Uuid, text: &str) -> Result<(), CommandError> {
        let Some(identity) = self.telegram_users().find_by_user_id(user_id).await? else {
            debug!(%user_id, "No Telegram identity; skipping notification");
            return Ok(());
        };

        let Some(chat_id) = identity.chat_id else {
            debug!(username = %identity.username, "Telegram chat not started; skipping notification");
            return Ok(());
        };

        if let Err(err) = self.notifier.send(chat_id, text).await {
            warn!(error = %err, chat_id, "Failed to send Telegram notification");
        }

        Ok(())
    }
}

fn parse_pull_request_state(raw: &str) -> PullRequestState {
    raw.parse().unwrap_or(PullRequestState::Idle)
}

/// Whether the pull request is in a state where round-level commands
/// (stop, restart, ping, fixed, verdicts) apply.
fn active_round(graph: &PullRequestGraph) -> bool {
    !matches!(
        parse_pull_request_state(&graph.pull_request.state),
        PullRequestState::Idle | PullRequestState::Closed
    )
}

/// Decision rule shared by `modified` and `start`: a decline dominates,
/// then the approval threshold, otherwise the round stays pending.
fn recompute_state(reviews: &[review::Model], approve_count: u32) -> PullRequestState {
    if reviews
        .iter()
        .any(|review| review.state == ReviewState::Declined.as_str())
    {
        return PullRequestState::Declined;
    }

    let approvals = reviews
        .iter()
        .filter(|review| review.state == ReviewState::Approved.as_str())
        .count() as u32;

    if approvals >= approve_count {
        PullRequestState::Approved
    } else {
        PullRequestState::Pending
    }
}
