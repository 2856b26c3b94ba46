//! Sift Server Shell
//!
//! Thin application shell that loads configuration, wires the scheduler to the
//! progress hub and serves the channel over WebSocket.
//! Core logic lives in the `crates/` directory.

mod commands;
mod error;
mod state;
mod ws;

pub use commands::{dispatch, handle_frame};
pub use error::CommandError;
pub use state::AppState;

use anyhow::Context;
use axum::{routing::get, Router};
use sift_browser::BrowserLauncher;
use sift_core::AppConfig;
use sift_export::CsvExporter;
use sift_scanner::{SelectorExtractor, SessionDeps};
use sift_scheduler::spawn_snapshot_writer;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How long shutdown waits for stopped sessions to persist.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Initialize tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sift=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Build the production collaborators from configuration.
pub fn build_deps(config: &AppConfig) -> anyhow::Result<SessionDeps> {
    let extractor =
        SelectorExtractor::new(&config.extractor).context("invalid extractor selectors")?;
    let output_dir = config.output_dir()?;
    info!("Export directory: {}", output_dir.display());

    Ok(SessionDeps {
        launcher: Arc::new(BrowserLauncher::new(config.browser.clone())),
        extractor: Arc::new(extractor),
        persistence: Arc::new(CsvExporter::new(output_dir)),
    })
}

/// Routes served by the shell.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::handler))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Serve until Ctrl-C, then stop every task and let sessions persist.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting Sift v{}", env!("CARGO_PKG_VERSION"));

    let deps = build_deps(&config)?;
    let state = Arc::new(AppState::new(&config, deps));

    let shutdown = CancellationToken::new();
    let snapshot_writer = if config.scheduler.snapshot_interval_secs > 0 {
        let path = config.snapshot_path()?;
        info!("Task snapshots: {}", path.display());
        Some(spawn_snapshot_writer(
            state.scheduler.clone(),
            path,
            Duration::from_secs(config.scheduler.snapshot_interval_secs),
            shutdown.clone(),
        ))
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Progress channel listening on ws://{}/ws", addr);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stopped = state.scheduler.stop_all();
    info!(stopped, "Shutting down");
    if tokio::time::timeout(SHUTDOWN_GRACE, state.scheduler.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Sessions still running after {:?}", SHUTDOWN_GRACE);
    }

    shutdown.cancel();
    if let Some(writer) = snapshot_writer {
        if let Err(e) = writer.await {
            tracing::warn!("Snapshot writer ended abnormally: {}", e);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "ok");
    }

    #[test]
    fn test_build_deps_with_defaults() {
        let mut config = AppConfig::default();
        config.export.output_dir = Some(std::env::temp_dir().join("sift-test-exports"));
        assert!(build_deps(&config).is_ok());
    }
}
