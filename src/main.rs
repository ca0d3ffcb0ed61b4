//! LWS - Lua web-script server
//!
//! Serves every request through the location table, running the matched
//! Lua script on the worker pool.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lws::api::create_router;
use lws::{spawn_cleanup_task, AppState, Config};

/// Main entry point for the LWS server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from `LWS_CONFIG` and environment overrides
/// 3. Compile locations and build the state pool, worker pool and stat cache
/// 4. Start the stat-cache cleanup task
/// 5. Serve until SIGINT/SIGTERM, then close idle engine instances
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lws=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LWS server");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        "Configuration loaded: port={}, root={}, threads={}, locations={}, stat_cache={}",
        config.server_port,
        config.root,
        config.thread_pool.threads,
        config.locations.len(),
        config.stat_cache.capacity
    );

    let state = AppState::from_config(&config).context("failed to initialize")?;
    let pipeline = state.pipeline.clone();
    let locations = state.locations.clone();

    let cleanup_handle = pipeline
        .stat_cache()
        .map(|cache| spawn_cleanup_task(cache.clone(), config.cleanup_interval));
    if cleanup_handle.is_some() {
        info!("Background cleanup task started");
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    let pool = pipeline.pool();
    for identity in locations.engine_configs() {
        pool.close_all(&identity);
    }
    info!("Engine instances closed: {:?}", pool.stats());
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal(cleanup_handle: Option<tokio::task::JoinHandle<()>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
