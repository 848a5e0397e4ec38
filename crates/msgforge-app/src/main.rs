//! Process entry point (§4.2, §6): loads config, wires every worker and sweep behind the
//! task supervisor, serves `/healthz`+`/metrics`, and waits for a shutdown signal before
//! draining in-flight work.

mod collaborators_stub;
mod health;
mod wiring;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Grace period the supervisor gets to drain in-flight entries before tasks are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let config = match msgforge_core::config::PipelineConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Err(error) = config.validate() {
        tracing::error!(error = %error, "configuration failed validation");
        std::process::exit(1);
    }

    let prometheus_enabled = config.monitoring.prometheus_enabled;
    let http_port = config.monitoring.prometheus_port;

    let pipeline = match wiring::build(config).await {
        Ok(pipeline) => pipeline,
        Err(error) => {
            tracing::error!(error = %error, "failed to build pipeline");
            std::process::exit(1);
        }
    };

    pipeline.supervisor.start().await;
    tracing::info!("msgforge pipeline started");

    let server = if prometheus_enabled {
        let router = health::router(pipeline.supervisor.clone());
        let addr = format!("0.0.0.0:{http_port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "serving /healthz and /metrics");
                Some(tokio::spawn(async move {
                    if let Err(error) = axum::serve(listener, router).await {
                        tracing::error!(error = %error, "http server stopped");
                    }
                }))
            }
            Err(error) => {
                tracing::error!(%addr, error = %error, "failed to bind http server, continuing without it");
                None
            }
        }
    } else {
        None
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining workers");

    pipeline.supervisor.stop(SHUTDOWN_GRACE).await;
    if let Some(server) = server {
        server.abort();
    }
    tracing::info!("shutdown complete");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
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
}
