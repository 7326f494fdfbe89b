pub mod aggregate;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod filters;
pub mod models;
pub mod validation;

use crate::api::AppState;
use crate::auth::TokenService;
use crate::config::Settings;
use crate::db::Database;
use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global subscriber. With a log directory, JSON lines go to a
/// daily rolling file; otherwise human-readable lines go to stdout.
pub fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("creating log directory {}", log_dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "daily-manager.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| anyhow::anyhow!(error))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|error| anyhow::anyhow!(error)),
    }
}

/// Opens the store, bootstraps the superuser and builds the application
/// state described by `settings`.
pub fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
    let db = Database::open(&settings.database_url)
        .with_context(|| format!("opening database {}", settings.database_url))?;

    if let Some(superuser) = &settings.superuser {
        let created = auth::ensure_superuser(&db, &superuser.username, &superuser.email, &superuser.password)
            .context("bootstrapping superuser")?;
        if created {
            tracing::info!(username = %superuser.username, "superuser created");
        } else {
            tracing::info!(username = %superuser.username, "superuser already exists");
        }
    }

    let tokens = TokenService::new(
        settings.secret_key.as_bytes(),
        settings.access_token_lifetime,
        settings.refresh_token_lifetime,
    );
    Ok(AppState::new(db, tokens, settings.time_zone))
}

pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let state = build_state(&settings)?;
    let app = api::router(state, settings.cors_allowed_origins.clone());

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(
        addr = %settings.bind_addr,
        time_zone = %settings.time_zone,
        "daily-manager listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
