//! # Server Configuration
//!
//! Axum router, shared application state and the OpenAPI document.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::review::ReviewCommands;
use crate::scm::BitbucketClient;
use crate::telegram::{TelegramNotifier, TelegramService};
use crate::telemetry::{self, TraceContext};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub commands: ReviewCommands,
    pub telegram: TelegramService,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        scm: BitbucketClient,
        notifier: TelegramNotifier,
    ) -> Self {
        let commands = ReviewCommands::new(db.clone(), config.clone(), scm, notifier.clone());
        let telegram = TelegramService::new(db.clone(), notifier);

        Self {
            db,
            config,
            commands,
            telegram,
        }
    }
}

/// Assigns each request a correlation ID, available through
/// [`telemetry::current_trace_id`] for the duration of the request.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let trace_id = format!("req-{}", &uuid::Uuid::new_v4().to_string()[..8]);
    telemetry::with_trace_context(TraceContext { trace_id }, next.run(request)).await
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/api/scm/bitbucket/webhook",
            post(handlers::bitbucket::bitbucket_webhook),
        )
        .route(
            "/api/telegram/webhook",
            post(handlers::telegram::telegram_webhook),
        )
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::bitbucket::bitbucket_webhook,
        crate::handlers::telegram::telegram_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Reviewbot API",
        description = "Code-review orchestration for Bitbucket Server",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
