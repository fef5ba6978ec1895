//! # Reviewbot Main Entry Point
//!
//! Wires configuration, telemetry, the database pool, migrations, the ping
//! scheduler and the HTTP server together.

use std::sync::Arc;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;
use tracing::info;

use reviewbot::config::ConfigLoader;
use reviewbot::scheduler::PingScheduler;
use reviewbot::scm::BitbucketClient;
use reviewbot::server::{AppState, create_app};
use reviewbot::telegram::TelegramNotifier;
use reviewbot::{db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new().load()?;

    telemetry::init_tracing(&config).context("failed to initialize tracing")?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, "Loaded configuration: {redacted}");
    }

    let config = Arc::new(config);

    let db = db::init_pool(&config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to run database migrations")?;

    let scm = BitbucketClient::new(
        config.bitbucket_base_url.as_deref().unwrap_or_default(),
        config.bitbucket_username.as_deref().unwrap_or_default(),
        config.bitbucket_password.as_deref().unwrap_or_default(),
    );
    let notifier = TelegramNotifier::new(
        &config.telegram_api_base,
        config.telegram_bot_token.as_deref().unwrap_or_default(),
    );

    let shutdown = CancellationToken::new();

    let scheduler = PingScheduler::new(
        config.clone(),
        db.clone(),
        scm.clone(),
        notifier.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState::new(config.clone(), db, scm, notifier);
    let addr = config.bind_addr().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = scheduler_handle.await;

    Ok(())
}
