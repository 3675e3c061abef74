//! glcmd-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, sets up tracing,
//! opens the store, starts the broker and the fetch loop, and serves HTTP
//! until a shutdown signal arrives. Handlers live in `routes.rs`, shared
//! state in `state.rs`, the poll loop in `fetcher.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use glcmd_broker::{EventBroker, KEEPALIVE_INTERVAL};
use glcmd_client::LinkUpClient;
use glcmd_config::{Config, LogFormat};
use glcmd_daemon::{fetcher::Fetcher, routes, state::AppState};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (dev convenience); production injects env vars.
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("glcmd-daemon: {err}");
            std::process::exit(2);
        }
    };

    init_tracing(&config);

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
    }

    let pool = glcmd_db::connect(&config.db_path).await?;
    glcmd_db::migrate(&pool).await?;
    info!(path = %config.db_path.display(), "database ready");

    let broker = Arc::new(EventBroker::new());
    Arc::clone(&broker).start(KEEPALIVE_INTERVAL);

    let state = Arc::new(AppState::new(
        pool.clone(),
        Arc::clone(&broker),
        config.fetch_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fetcher = Fetcher::new(
        LinkUpClient::new(),
        Arc::clone(&state),
        config.email.clone(),
        config.password.clone(),
    );
    let fetch_task = tokio::spawn(fetcher.run(shutdown_rx));

    let app = routes::build_app(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("glcmd-daemon listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server crashed")?;

    // The signal already told the fetch loop to stop; wait for it, then tear
    // down the broker and the store.
    let _ = fetch_task.await;
    broker.stop();
    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.as_str().into());

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Resolve on SIGINT or SIGTERM, flipping the shutdown flag for the fetch
/// loop on the way out.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
