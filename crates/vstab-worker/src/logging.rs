//! Tracing setup and structured session logging.

use tracing::{error, info, warn, Level, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use crate::error::WorkerError;

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, ANSI text
/// otherwise. `RUST_LOG` directives override the `vstab=info` default.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vstab=info"));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Logger for one stabilization session.
///
/// Every line carries the session id and the operation, so interleaved
/// sessions stay separable.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    session_id: String,
    operation: String,
}

impl SessionLogger {
    /// Create a logger with a fresh session id.
    pub fn new(operation: &str) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), operation)
    }

    pub fn with_id(session_id: &str, operation: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn log_start(&self, detail: &str) {
        info!(session_id = %self.session_id, operation = %self.operation, detail, "Stabilization started");
    }

    pub fn log_completion(&self, detail: &str) {
        info!(session_id = %self.session_id, operation = %self.operation, detail, "Stabilization finished");
    }

    /// Cancellation is logged as a warning, anything else as an error.
    pub fn log_failure(&self, err: &WorkerError) {
        if failure_level(err) == Level::WARN {
            warn!(session_id = %self.session_id, operation = %self.operation, "Stabilization cancelled");
        } else {
            error!(
                session_id = %self.session_id,
                operation = %self.operation,
                error = %err,
                "Stabilization failed"
            );
        }
    }

    /// Span carrying the session fields, for work done on other threads.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "session",
            session_id = %self.session_id,
            operation = %self.operation
        )
    }
}

fn failure_level(err: &WorkerError) -> Level {
    if err.is_cancelled() {
        Level::WARN
    } else {
        Level::ERROR
    }
}
