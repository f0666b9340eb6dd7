//! # Structured Logging Module
//!
//! Environment-aware structured logging for the marketplace core and its background worker.
//! Console output is human readable by default; set `TACK_MARKET_LOG_FORMAT=json` for JSON
//! lines. `RUST_LOG` overrides the environment-derived level.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::{OfferId, TackId, UserId};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let layer = if use_json_format() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TACK_MARKET_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("TACK_MARKET_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log a committed tack lifecycle operation
pub fn log_tack_operation(
    operation: &str,
    tack_id: TackId,
    actor_id: Option<UserId>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        tack_id = %tack_id,
        actor_id = ?actor_id,
        status = %status,
        details = details,
        "TACK_OPERATION"
    );
}

/// Log a committed offer operation
pub fn log_offer_operation(
    operation: &str,
    offer_id: OfferId,
    tack_id: TackId,
    runner_id: UserId,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        offer_id = %offer_id,
        tack_id = %tack_id,
        runner_id = %runner_id,
        status = %status,
        "OFFER_OPERATION"
    );
}
