//! Tracing setup and request-scoped correlation IDs.
//!
//! One global subscriber is installed at startup; `log`-based dependencies
//! (sea-orm pool logging) are bridged into the same pipeline. Each webhook
//! request runs inside a task-local [`TraceContext`] so the error layer can
//! stamp responses with the request's trace ID.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;

/// Correlation metadata carried through one request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber. Later calls are no-ops, so code paths
/// that boot the full service more than once in-process do not collide on
/// the global logger.
///
/// `RUST_LOG` overrides the configured log level; the output format is
/// JSON unless `log_format` asks for `pretty`.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if SUBSCRIBER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    // Route `log::` records into tracing. Failure here means a logger is
    // already registered, which is fine.
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let output = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
    {
        SUBSCRIBER_INSTALLED.store(false, Ordering::SeqCst);
        return Err(err.into());
    }

    Ok(())
}

/// Run `future` with `context` bound to the current task.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    TRACE_CONTEXT.scope(context, future).await
}

/// Trace ID of the active request, if the caller runs inside one.
pub fn current_trace_id() -> Option<String> {
    TRACE_CONTEXT
        .try_with(|context| context.trace_id.clone())
        .ok()
}
