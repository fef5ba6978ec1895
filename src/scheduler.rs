//! # Review Ping Scheduler
//!
//! Background task that nudges reviewers about pending reviews once per
//! weekday at a configured time. Each run resolves the review policy of
//! every affected repository at most once through a run-scoped memo that is
//! discarded when the run completes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, EntityTrait};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::models::{PullRequestState, git_repository};
use crate::repositories::{ReviewRepository, TelegramUserRepository};
use crate::review::config::{CONFIG_FILE_PATH, CodeReviewConfig, NotificationChannel, parse_code_review_config};
use crate::scm::BitbucketClient;
use crate::telegram::{self, TelegramNotifier};

/// Background scheduler service.
pub struct PingScheduler {
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    scm: BitbucketClient,
    notifier: TelegramNotifier,
}

#[derive(Debug, Default)]
struct RunStats {
    reviews_considered: u64,
    notifications_sent: u64,
    reviews_skipped: u64,
    errors: u64,
}

impl PingScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        scm: BitbucketClient,
        notifier: TelegramNotifier,
    ) -> Self {
        Self {
            config,
            db,
            scm,
            notifier,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting review ping scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);
        let mut next_run = next_run_after(
            Utc::now(),
            self.config.scheduler.ping_hour,
            self.config.scheduler.ping_minute,
        );
        info!(next_run = %next_run, "Next review ping scheduled");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Review ping scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let now = Utc::now();
                    if now < next_run {
                        continue;
                    }

                    let run_started = Instant::now();
                    self.run_ping().await;
                    let elapsed = run_started.elapsed();
                    histogram!("review_ping_run_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);

                    next_run = next_run_after(
                        now,
                        self.config.scheduler.ping_hour,
                        self.config.scheduler.ping_minute,
                    );
                    debug!(next_run = %next_run, "Next review ping scheduled");
                }
            }
        }

        info!("Review ping scheduler stopped");
    }

    /// Ping every pending review of every pull request with an active
    /// round. Failures are counted and logged per review; one broken
    /// repository must not starve the rest of the run.
    async fn run_ping(&self) {
        counter!("review_ping_runs_total").increment(1);
        let mut stats = RunStats::default();
        let mut config_memo: HashMap<(String, String), CodeReviewConfig> = HashMap::new();

        let pending = match ReviewRepository::new(self.db.clone()).list_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = ?err, "Failed to load pending reviews");
                return;
            }
        };

        let now = Utc::now().fixed_offset();

        for (review, pull_request) in pending {
            stats.reviews_considered += 1;

            if pull_request.state.parse::<PullRequestState>() != Ok(PullRequestState::Pending) {
                stats.reviews_skipped += 1;
                continue;
            }

            let repository = match git_repository::Entity::find_by_id(pull_request.git_repository_id)
                .one(&self.db)
                .await
            {
                Ok(Some(repository)) => repository,
                Ok(None) => {
                    stats.reviews_skipped += 1;
                    continue;
                }
                Err(err) => {
                    stats.errors += 1;
                    error!(error = ?err, "Failed to load repository for pending review");
                    continue;
                }
            };

            let key = (repository.project.clone(), repository.slug.clone());
            if !config_memo.contains_key(&key) {
                let resolved = self
                    .fetch_config(&repository.project, &repository.slug)
                    .await;
                config_memo.insert(key.clone(), resolved);
            }
            let config = &config_memo[&key];

            if config.notification != NotificationChannel::Telegram {
                stats.reviews_skipped += 1;
                continue;
            }

            let days = (now - review.updated_at).num_days();
            match self
                .notify(review.user_id, &pull_request.title, &pull_request.link, days)
                .await
            {
                Ok(true) => stats.notifications_sent += 1,
                Ok(false) => stats.reviews_skipped += 1,
                Err(err) => {
                    stats.errors += 1;
                    warn!(error = ?err, review_id = %review.id, "Failed to ping reviewer");
                }
            }
        }

        counter!("review_ping_notifications_total").increment(stats.notifications_sent);

        info!(
            considered = stats.reviews_considered,
            sent = stats.notifications_sent,
            skipped = stats.reviews_skipped,
            errors = stats.errors,
            "Review ping run completed"
        );
    }

    async fn fetch_config(&self, project: &str, slug: &str) -> CodeReviewConfig {
        match self.scm.raw_file(project, slug, CONFIG_FILE_PATH).await {
            Ok(content) => parse_code_review_config(&content),
            Err(err) => {
                debug!(error = %err, project, slug, "Review policy not readable; using defaults");
                CodeReviewConfig::default()
            }
        }
    }

    /// Returns whether a notification was actually sent.
    async fn notify(
        &self,
        user_id: uuid::Uuid,
        title: &str,
        link: &str,
        days: i64,
    ) -> Result<bool, sea_orm::DbErr> {
        let Some(identity) = TelegramUserRepository::new(self.db.clone())
            .find_by_user_id(user_id)
            .await?
        else {
            return Ok(false);
        };

        let Some(chat_id) = identity.chat_id else {
            return Ok(false);
        };

        if let Err(err) = self
            .notifier
            .send(chat_id, &telegram::ping_message(title, link, days))
            .await
        {
            warn!(error = %err, chat_id, "Failed to send review ping");
            return Ok(false);
        }

        Ok(true)
    }
}

/// The next weekday occurrence of `hour:minute` strictly after `now`.
/// Saturdays and Sundays are skipped.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);

    let mut day = now.date_naive();
    if now.time() >= time {
        day = day.succ_opt().unwrap_or(day);
    }
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day.succ_opt().unwrap_or(day);
    }

    Utc.from_utc_datetime(&day.and_time(time))
}
