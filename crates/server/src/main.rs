mod api;
mod bootstrap;
mod health;
pub mod workflow;

use anyhow::Result;
use reqflow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use reqflow_core::config::LogFormat::*;
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

    let sweeper_task = app.sweeper.clone().spawn(app.config.notify.sweep_interval_secs);
    tracing::info!(
        event_name = "system.server.sweeper_started",
        correlation_id = "bootstrap",
        interval_secs = app.config.notify.sweep_interval_secs,
        "retry sweeper scheduled"
    );

    let router = health::router(app.db_pool.clone()).merge(api::router(api::ApiState {
        service: app.service.clone(),
        ledger: app.ledger.clone(),
        sweeper: app.sweeper.clone(),
    }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "reqflow-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "reqflow-server stopping"
    );
    sweeper_task.abort();

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
