mod api;
mod bootstrap;
mod health;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use supplyq_core::config::{AppConfig, LoadOptions};
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

fn init_logging(config: &AppConfig) {
    use supplyq_core::config::LogFormat::*;
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
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    if let bootstrap::Readiness::Degraded { reasons } = &app.readiness {
        tracing::warn!(
            event_name = "system.server.degraded",
            correlation_id = "bootstrap",
            reasons = %reasons.join("; "),
            "starting in degraded mode"
        );
    }

    let router = api::router(api::ApiState::new(app.runtime.clone()))
        .merge(health::router(health::HealthState::new(
            app.db_pool.clone(),
            app.runtime.clone(),
            app.readiness.clone(),
        )))
        .layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "supplyq-server listening"
    );

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let serve = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            signal.notify_one();
        })
        .into_future();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    tokio::select! {
        result = serve => result?,
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                event_name = "system.server.drain_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish before the shutdown deadline"
            );
        }
    }

    app.db_pool.close().await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "supplyq-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "shutdown signal received; draining requests"
    );
}
