mod bootstrap;
mod feedback_loop;
mod health;

use std::time::Duration;

use anyhow::Result;
use intentd_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use intentd_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.device_channel.clone(),
    )
    .await?;

    let feedback_task = if app.config.feedback.enabled {
        Some(feedback_loop::spawn(app.service.clone(), app.config.feedback.clone()))
    } else {
        tracing::info!(
            event_name = "system.feedback.disabled",
            correlation_id = "bootstrap",
            "feedback loop disabled in configuration"
        );
        None
    };

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "intentd-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "intentd-server stopping"
    );

    let drain = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if let Some(task) = feedback_task {
        task.shutdown(drain).await;
    }

    if tokio::time::timeout(drain, app.device_channel.shutdown()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "device channel did not shut down within the drain window"
        );
    }
    app.network_channel.teardown().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
