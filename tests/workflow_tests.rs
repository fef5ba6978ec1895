//! Integration tests for the review workflow: commands run against an
//! in-memory SQLite database with Bitbucket and Telegram mocked by
//! wiremock.

use std::sync::Arc;
use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewbot::config::AppConfig;
use reviewbot::models::{
    PullRequestState, ReviewState, git_repository, pull_request, review, telegram_user, user,
};
use reviewbot::repositories::{
    GitRepositoryRepository, PullRequestRepository, ReviewRepository, TelegramUserRepository,
    UserRepository,
};
use reviewbot::review::{OpenParams, ReviewCommands};
use reviewbot::scm::BitbucketClient;
use reviewbot::telegram::{TelegramNotifier, TelegramService};

const PROJECT: &str = "PRJ";
const REPO: &str = "repo";
const EXT_ID: i64 = 7;

struct Harness {
    db: DatabaseConnection,
    bitbucket: MockServer,
    telegram: MockServer,
    commands: ReviewCommands,
}

async fn harness() -> Harness {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory db");
    Migrator::up(&db, None).await.expect("apply migrations");

    let bitbucket = MockServer::start().await;
    let telegram = MockServer::start().await;

    let mut config = AppConfig::default();
    config.restart_settle_seconds = 0;

    let scm = BitbucketClient::new(&bitbucket.uri(), "bot", "secret");
    let notifier = TelegramNotifier::new(&telegram.uri(), "token");
    let commands = ReviewCommands::new(db.clone(), Arc::new(config), scm, notifier);

    Harness {
        db,
        bitbucket,
        telegram,
        commands,
    }
}

fn repo_path(suffix: &str) -> String {
    format!("/rest/api/1.0/projects/{PROJECT}/repos/{REPO}{suffix}")
}

async fn mount_policy(harness: &Harness, body: &str) {
    Mock::given(method("GET"))
        .and(path(repo_path("/raw/.codereview.json")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(&harness.bitbucket)
        .await;
}

async fn mount_telegram(harness: &Harness) {
    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&harness.telegram)
        .await;
}

fn open_params(reviewers: &[&str]) -> OpenParams {
    OpenParams {
        project: PROJECT.to_string(),
        repository: REPO.to_string(),
        pull_request_id: EXT_ID,
        author_email: "author@example.com".to_string(),
        branch: "feature/x".to_string(),
        title: "Add feature".to_string(),
        link: "https://git.example.com/pr/7".to_string(),
        from_link: "https://git.example.com/fork.git".to_string(),
        to_link: "https://git.example.com/repo.git".to_string(),
        reviewer_emails: reviewers.iter().map(|email| email.to_string()).collect(),
    }
}

async fn seed_with_reviewers(harness: &Harness, policy: &str, reviewers: &[&str]) {
    mount_policy(harness, policy).await;
    harness
        .commands
        .open(open_params(reviewers))
        .await
        .expect("open succeeds");
}

async fn pull_request_row(db: &DatabaseConnection) -> pull_request::Model {
    pull_request::Entity::find()
        .one(db)
        .await
        .expect("query pull request")
        .expect("pull request exists")
}

async fn review_state_of(db: &DatabaseConnection, email: &str) -> String {
    let reviewer = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await
        .expect("query user")
        .expect("user exists");
    review::Entity::find()
        .filter(review::Column::UserId.eq(reviewer.id))
        .one(db)
        .await
        .expect("query review")
        .expect("review exists")
        .state
}

async fn link_telegram_chat(db: &DatabaseConnection, email: &str, username: &str, chat_id: i64) {
    let account = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await
        .expect("query user")
        .expect("user exists");
    TelegramUserRepository::new(db.clone())
        .create(username, Some(chat_id), Some(account.id))
        .await
        .expect("create telegram identity");
}

#[tokio::test]
async fn repository_inserts_return_rows_with_generated_uuid_keys() {
    let harness = harness().await;

    // Every table uses an application-generated UUID primary key; each
    // insert must hand back the persisted row on SQLite as well as Postgres.
    let repository = GitRepositoryRepository::new(harness.db.clone())
        .get_or_create("bitbucket", PROJECT, REPO)
        .await
        .expect("insert repository");
    let author = UserRepository::new(harness.db.clone())
        .get_or_create("author@example.com")
        .await
        .expect("insert user");
    let pull_request = PullRequestRepository::new(harness.db.clone())
        .create(
            repository.id,
            EXT_ID,
            "Add feature",
            "https://git.example.com/pr/7",
            Some(author.id),
        )
        .await
        .expect("insert pull request");
    let review = ReviewRepository::new(harness.db.clone())
        .get_or_create(pull_request.id, author.id, ReviewState::Idle)
        .await
        .expect("insert review");
    let identity = TelegramUserRepository::new(harness.db.clone())
        .create("authorhandle", Some(42), Some(author.id))
        .await
        .expect("insert telegram identity");

    assert!(!repository.id.is_nil());
    assert_eq!(pull_request.git_repository_id, repository.id);
    assert_eq!(review.pull_request_id, pull_request.id);
    assert_eq!(review.user_id, author.id);
    assert_eq!(identity.user_id, Some(author.id));

    let stored = pull_request::Entity::find_by_id(pull_request.id)
        .one(&harness.db)
        .await
        .expect("query pull request")
        .expect("pull request exists");
    assert_eq!(stored.id, pull_request.id);
}

#[tokio::test]
async fn unknown_repository_close_posts_single_comment_without_writes() {
    let harness = harness().await;

    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/42/comments")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.bitbucket)
        .await;

    harness
        .commands
        .close(PROJECT, REPO, 42)
        .await
        .expect("close succeeds");

    assert_eq!(
        git_repository::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        pull_request::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn unknown_pull_request_ping_posts_diagnostic() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &[]).await;

    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/99/comments")))
        .and(body_string_contains("not registered"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.bitbucket)
        .await;

    harness
        .commands
        .ping(PROJECT, REPO, 99)
        .await
        .expect("ping succeeds");

    assert_eq!(
        pull_request::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn open_is_idempotent_and_reopen_resets_state() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &[]).await;

    let first = pull_request_row(&harness.db).await;
    assert_eq!(first.state, PullRequestState::Idle.as_str());

    // Second delivery of the same event changes nothing.
    harness
        .commands
        .open(open_params(&[]))
        .await
        .expect("open succeeds");
    assert_eq!(
        pull_request::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        1
    );

    // A re-open after the round started resets the pull request.
    let record = pull_request_row(&harness.db).await;
    PullRequestRepository::new(harness.db.clone())
        .set_state(record, PullRequestState::Pending)
        .await
        .expect("force pending");

    let mut reopened = open_params(&[]);
    reopened.title = "Add feature, take two".to_string();
    harness.commands.open(reopened).await.expect("open succeeds");

    let row = pull_request_row(&harness.db).await;
    assert_eq!(row.state, PullRequestState::Idle.as_str());
    assert_eq!(row.title, "Add feature, take two");
    assert_eq!(
        pull_request::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn explicit_reviewers_start_idle() {
    let harness = harness().await;
    seed_with_reviewers(
        &harness,
        r#"{ "autoAssign": false }"#,
        &["r1@example.com", "r2@example.com"],
    )
    .await;

    assert_eq!(review::Entity::find().count(&harness.db).await.unwrap(), 2);
    assert_eq!(
        review_state_of(&harness.db, "r1@example.com").await,
        ReviewState::Idle.as_str()
    );
    assert_eq!(
        review_state_of(&harness.db, "r2@example.com").await,
        ReviewState::Idle.as_str()
    );
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let harness = harness().await;
    let policy = r#"{
        "autoAssign": false,
        "allowedUsers": [
            { "email": "r1@example.com", "telegram": "r1handle" },
            { "email": "r2@example.com" }
        ]
    }"#;
    seed_with_reviewers(&harness, policy, &[]).await;

    // author + two allowed users
    assert_eq!(user::Entity::find().count(&harness.db).await.unwrap(), 3);
    assert_eq!(
        telegram_user::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        1
    );

    harness
        .commands
        .open(open_params(&[]))
        .await
        .expect("open succeeds");

    assert_eq!(user::Entity::find().count(&harness.db).await.unwrap(), 3);
    assert_eq!(
        telegram_user::Entity::find()
            .count(&harness.db)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn start_moves_reviews_to_pending_and_notifies() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;
    link_telegram_chat(&harness.db, "r1@example.com", "r1handle", 101).await;

    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .and(body_string_contains("review"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&harness.telegram)
        .await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    let row = pull_request_row(&harness.db).await;
    assert_eq!(row.state, PullRequestState::Pending.as_str());
    assert_eq!(
        review_state_of(&harness.db, "r1@example.com").await,
        ReviewState::Pending.as_str()
    );
}

#[tokio::test]
async fn decline_dominates_approvals() {
    let harness = harness().await;
    let policy = r#"{ "autoAssign": false, "approveCount": 2 }"#;
    seed_with_reviewers(&harness, policy, &["r1@example.com", "r2@example.com"]).await;
    mount_telegram(&harness).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");
    harness
        .commands
        .approved(PROJECT, REPO, EXT_ID, "r1@example.com")
        .await
        .expect("approved succeeds");

    let row = pull_request_row(&harness.db).await;
    assert_eq!(row.state, PullRequestState::Pending.as_str());

    harness
        .commands
        .declined(PROJECT, REPO, EXT_ID, "r2@example.com")
        .await
        .expect("declined succeeds");

    let row = pull_request_row(&harness.db).await;
    assert_eq!(row.state, PullRequestState::Declined.as_str());
    assert_eq!(
        review_state_of(&harness.db, "r1@example.com").await,
        ReviewState::Approved.as_str()
    );
    assert_eq!(
        review_state_of(&harness.db, "r2@example.com").await,
        ReviewState::Declined.as_str()
    );
}

#[tokio::test]
async fn approval_threshold_with_notifiable_author_approves_and_notifies_once() {
    let harness = harness().await;
    let policy = r#"{ "autoAssign": false, "approveCount": 2 }"#;
    seed_with_reviewers(&harness, policy, &["r1@example.com", "r2@example.com"]).await;
    link_telegram_chat(&harness.db, "author@example.com", "authorhandle", 500).await;

    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .and(body_string_contains("approved"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&harness.telegram)
        .await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");
    harness
        .commands
        .approved(PROJECT, REPO, EXT_ID, "r1@example.com")
        .await
        .expect("first approval succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Pending.as_str()
    );

    harness
        .commands
        .approved(PROJECT, REPO, EXT_ID, "r2@example.com")
        .await
        .expect("second approval succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Approved.as_str()
    );
}

#[tokio::test]
async fn approval_threshold_without_notifiable_author_leaves_state() {
    let harness = harness().await;
    let policy = r#"{ "autoAssign": false, "approveCount": 1 }"#;
    seed_with_reviewers(&harness, policy, &["r1@example.com"]).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");
    harness
        .commands
        .approved(PROJECT, REPO, EXT_ID, "r1@example.com")
        .await
        .expect("approved succeeds");

    // Threshold met, but the author has no Telegram identity: the pull
    // request stays pending.
    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Pending.as_str()
    );
    assert_eq!(
        review_state_of(&harness.db, "r1@example.com").await,
        ReviewState::Approved.as_str()
    );
}

#[tokio::test]
async fn restart_removes_and_readds_every_reviewer() {
    let harness = harness().await;
    seed_with_reviewers(
        &harness,
        r#"{ "autoAssign": false }"#,
        &["r1@example.com", "r2@example.com"],
    )
    .await;
    link_telegram_chat(&harness.db, "r1@example.com", "r1handle", 1).await;
    link_telegram_chat(&harness.db, "r2@example.com", "r2handle", 2).await;
    mount_telegram(&harness).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    Mock::given(method("DELETE"))
        .and(path_regex(r"/pull-requests/7/participants/.+$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&harness.bitbucket)
        .await;
    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/7/participants")))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&harness.bitbucket)
        .await;

    harness
        .commands
        .restart(PROJECT, REPO, EXT_ID)
        .await
        .expect("restart succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Pending.as_str()
    );
}

#[tokio::test]
async fn stop_returns_round_to_idle() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");
    harness
        .commands
        .stop(PROJECT, REPO, EXT_ID)
        .await
        .expect("stop succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Idle.as_str()
    );
    assert_eq!(
        review_state_of(&harness.db, "r1@example.com").await,
        ReviewState::Idle.as_str()
    );
}

#[tokio::test]
async fn assign_rejects_non_idle_or_assigned_pull_requests() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;

    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/7/comments")))
        .and(body_string_contains("already assigned"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.bitbucket)
        .await;

    let params = open_params(&[]);
    harness
        .commands
        .assign(reviewbot::review::AssignParams {
            project: params.project,
            repository: params.repository,
            pull_request_id: params.pull_request_id,
            author_email: params.author_email,
            branch: params.branch,
            from_link: params.from_link,
            to_link: params.to_link,
        })
        .await
        .expect("assign succeeds");

    // No detached assignment ran, so no review rows were added.
    assert_eq!(review::Entity::find().count(&harness.db).await.unwrap(), 1);
}

#[tokio::test]
async fn state_transitions_refresh_updated_at() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;

    let before = pull_request_row(&harness.db).await.updated_at;
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    let after = pull_request_row(&harness.db).await.updated_at;
    assert!(after > before, "updated_at did not advance: {after} <= {before}");
}

#[tokio::test]
async fn bot_pending_lists_open_reviews() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;
    link_telegram_chat(&harness.db, "r1@example.com", "r1handle", 777).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .and(body_string_contains("Reviews waiting"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&harness.telegram)
        .await;
    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .and(body_string_contains("no reviews waiting"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&harness.telegram)
        .await;

    let notifier = TelegramNotifier::new(&harness.telegram.uri(), "token");
    let service = TelegramService::new(harness.db.clone(), notifier);

    service.pending(777).await.expect("pending succeeds");
    service.pending(888).await.expect("pending succeeds");
}

#[tokio::test]
async fn removed_reviewer_row_is_deleted() {
    let harness = harness().await;
    seed_with_reviewers(
        &harness,
        r#"{ "autoAssign": false }"#,
        &["r1@example.com", "r2@example.com"],
    )
    .await;

    harness
        .commands
        .remove(PROJECT, REPO, EXT_ID, "r1@example.com")
        .await
        .expect("remove succeeds");

    assert_eq!(review::Entity::find().count(&harness.db).await.unwrap(), 1);

    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/7/comments")))
        .and(body_string_contains("not a reviewer"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.bitbucket)
        .await;

    harness
        .commands
        .remove(PROJECT, REPO, EXT_ID, "r1@example.com")
        .await
        .expect("remove succeeds");
}

#[tokio::test]
async fn add_during_pending_round_creates_pending_review_and_notifies() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    let account = UserRepository::new(harness.db.clone())
        .get_or_create("late@example.com")
        .await
        .expect("create user");
    TelegramUserRepository::new(harness.db.clone())
        .create("latehandle", Some(301), Some(account.id))
        .await
        .expect("create telegram identity");

    Mock::given(method("POST"))
        .and(path("/bottoken/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&harness.telegram)
        .await;

    harness
        .commands
        .add(PROJECT, REPO, EXT_ID, "late@example.com")
        .await
        .expect("add succeeds");

    assert_eq!(
        review_state_of(&harness.db, "late@example.com").await,
        ReviewState::Pending.as_str()
    );
}

#[tokio::test]
async fn close_preserves_review_history_and_is_terminal() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;

    harness
        .commands
        .close(PROJECT, REPO, EXT_ID)
        .await
        .expect("close succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Closed.as_str()
    );
    assert_eq!(review::Entity::find().count(&harness.db).await.unwrap(), 1);

    // Commands against a closed pull request report an invalid state.
    Mock::given(method("POST"))
        .and(path(repo_path("/pull-requests/7/comments")))
        .and(body_string_contains("state"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.bitbucket)
        .await;

    harness
        .commands
        .fixed(PROJECT, REPO, EXT_ID)
        .await
        .expect("fixed succeeds");

    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Closed.as_str()
    );
}

#[tokio::test]
async fn reviews_without_matching_review_keep_review_set_unchanged() {
    let harness = harness().await;
    seed_with_reviewers(&harness, r#"{ "autoAssign": false }"#, &["r1@example.com"]).await;
    mount_telegram(&harness).await;

    harness
        .commands
        .start(PROJECT, REPO, EXT_ID)
        .await
        .expect("start succeeds");

    // A verdict from someone who is not a reviewer still declines the
    // pull request, but creates no review row.
    harness
        .commands
        .declined(PROJECT, REPO, EXT_ID, "stranger@example.com")
        .await
        .expect("declined succeeds");

    assert_eq!(review::Entity::find().count(&harness.db).await.unwrap(), 1);
    assert_eq!(
        pull_request_row(&harness.db).await.state,
        PullRequestState::Declined.as_str()
    );
}
