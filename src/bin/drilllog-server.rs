//! HTTP service binary for edgequake-drilllog.
//!
//! Serves [`edgequake_drilllog::server::router`] on `DRILLLOG_BIND`
//! (default `0.0.0.0:8000`). The provider is resolved from the environment
//! exactly as in the CLI; set `DRILLLOG_ALLOW_LOCAL_PATHS=1` to accept paths
//! on the server's filesystem in addition to URLs.

use anyhow::{Context, Result};
use edgequake_drilllog::server::{router, AppState};
use edgequake_drilllog::{DrillLogPipeline, ExtractionConfig, ResultCache};
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgequake_drilllog=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let bind = std::env::var("DRILLLOG_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid DRILLLOG_BIND address '{bind}'"))?;
    let allow_local_paths = env_flag("DRILLLOG_ALLOW_LOCAL_PATHS");

    let pipeline = DrillLogPipeline::from_config(ExtractionConfig::default())
        .context("Failed to set up the extraction pipeline")?
        .with_cache(ResultCache::default());
    let app = router(AppState::new(pipeline, allow_local_paths));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        "Drill log service listening on {} (local paths {})",
        addr,
        if allow_local_paths { "allowed" } else { "rejected" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// `1`, `true` and `yes` (any case) enable a flag.
fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
