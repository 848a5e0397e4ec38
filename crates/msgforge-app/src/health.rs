//! The operational HTTP surface (§4.2, §9): `/healthz` reports the supervisor's
//! aggregated task health, `/metrics` renders the Prometheus registry. Nothing else is
//! served here — there is no public API in scope (spec §1).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use msgforge_supervisor::{OverallHealth, Supervisor};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    supervisor: Arc<Supervisor>,
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(AppState { supervisor })
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.supervisor.health();
    let overall = state.supervisor.overall_health();
    let status = match overall {
        OverallHealth::Healthy => StatusCode::OK,
        OverallHealth::Degraded => StatusCode::OK,
        OverallHealth::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = json!({
        "status": format!("{overall:?}").to_lowercase(),
        "tasks": tasks.into_iter().map(|(name, health)| {
            json!({
                "name": name,
                "state": format!("{:?}", health.state).to_lowercase(),
                "restart_count": health.restart_count,
                "uptime_seconds": health.uptime.as_secs(),
                "last_error": health.last_error,
            })
        }).collect::<Vec<_>>(),
    });

    (status, Json(body))
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        msgforge_core::metrics::render(),
    )
}
