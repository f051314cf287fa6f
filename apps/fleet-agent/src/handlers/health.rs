//! 健康检查与计数器
//!
//! - GET /health
//! - GET /metrics

use crate::AppState;
use crate::utils::response::{metrics_to_dto, ok};
use api_contract::HealthDto;
use axum::{extract::State, response::Response};
use fleet_telemetry::metrics;

pub async fn health(State(state): State<AppState>) -> Response {
    let statuses = state.orchestrator.status();
    let sessions_total = statuses.iter().map(|status| status.sessions.len()).sum();
    let sessions_connected = statuses
        .iter()
        .map(|status| status.connected_sessions())
        .sum();
    ok(HealthDto {
        ok: true,
        drivers_running: statuses.len(),
        sessions_total,
        sessions_connected,
    })
}

pub async fn get_metrics() -> Response {
    ok(metrics_to_dto(metrics().snapshot()))
}
