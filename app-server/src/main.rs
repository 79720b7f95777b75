use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sau_app_server::{AppState, ServerConfig, router};
use sau_folder_watcher::{JsonFileStore, WatchController};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serve the material library of a watched folder over HTTP.
#[derive(Parser, Debug)]
#[command(name = "sau-app-server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "SAU_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long, env = "SAU_BIND")]
    bind: Option<SocketAddr>,

    /// Directory for persisted settings (overrides config)
    #[arg(long, env = "SAU_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Poll interval of the change detector in milliseconds (overrides config)
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sau_folder_watcher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).await?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.watch = config.watch.with_poll_interval(Duration::from_millis(ms));
    }

    let store = JsonFileStore::open(config.settings_path())
        .await
        .with_context(|| format!("failed to open settings in {}", config.state_dir.display()))?;
    info!("Settings stored in {}", store.path().display());
    let controller = Arc::new(
        WatchController::new(config.watch.clone(), Arc::new(store))
            .await
            .context("invalid watch configuration")?,
    );

    match controller.resume().await {
        Ok(Some(folder)) => info!("Resumed watching {}", folder.display()),
        Ok(None) => info!("No watch folder configured"),
        Err(e) => warn!("Failed to resume watch: {e}"),
    }

    let app = router(
        AppState::new(Arc::clone(&controller)),
        config.watch.max_upload_bytes,
    );
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
