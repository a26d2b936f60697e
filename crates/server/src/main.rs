mod bootstrap;
mod health;
mod http;
mod intake;
mod metrics;

use std::time::Duration;

use anyhow::Result;
use farmhand_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use farmhand_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let shutdown = CancellationToken::new();

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let server = tokio::spawn(http::serve(listener, http::router(&app), shutdown.clone()));

    let worker = if app.config.worker.enabled {
        let worker = app.worker.clone();
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        tracing::info!(
            event_name = "system.worker.disabled",
            correlation_id = "bootstrap",
            "queue worker disabled by configuration"
        );
        None
    };

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "farmhand-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "farmhand-server stopping"
    );

    shutdown.cancel();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::error!(
                    event_name = "system.worker.join_failed",
                    correlation_id = "shutdown",
                    error = %error,
                    "queue worker task failed"
                );
            }
        }
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!(
                event_name = "system.http.error",
                correlation_id = "shutdown",
                error = %error,
                "http endpoint terminated with an error"
            ),
            Err(error) => tracing::error!(
                event_name = "system.http.join_failed",
                correlation_id = "shutdown",
                error = %error,
                "http endpoint task failed"
            ),
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "shutdown grace period elapsed with work still running"
        );
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
