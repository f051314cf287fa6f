//! 驱动状态与控制接口
//!
//! - GET /drivers
//! - GET /drivers/:driver_id
//! - POST /drivers/:driver_id/start
//! - POST /drivers/:driver_id/stop
//! - POST /drivers/:driver_id/sync

use crate::AppState;
use crate::utils::response::{
    bad_request_error, driver_status_to_dto, not_running_error, ok, orchestrator_error,
    sync_report_to_dto,
};
use api_contract::DriverStatusDto;
use axum::{
    extract::{Path, State},
    response::Response,
};
use domain::DriverId;

fn parse_driver_id(raw: &str) -> Result<DriverId, Response> {
    match raw.trim().parse::<DriverId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(bad_request_error(format!("invalid driver id: {raw}"))),
    }
}

pub async fn list_drivers(State(state): State<AppState>) -> Response {
    let drivers: Vec<DriverStatusDto> = state
        .orchestrator
        .status()
        .into_iter()
        .map(driver_status_to_dto)
        .collect();
    ok(drivers)
}

pub async fn get_driver(State(state): State<AppState>, Path(driver_id): Path<String>) -> Response {
    let driver_id = match parse_driver_id(&driver_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.driver_status(driver_id) {
        Some(status) => ok(driver_status_to_dto(status)),
        None => not_running_error(driver_id),
    }
}

pub async fn start_driver(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
) -> Response {
    let driver_id = match parse_driver_id(&driver_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.start(driver_id).await {
        Ok(()) => match state.orchestrator.driver_status(driver_id) {
            Some(status) => ok(driver_status_to_dto(status)),
            None => not_running_error(driver_id),
        },
        Err(err) => orchestrator_error(err),
    }
}

pub async fn stop_driver(State(state): State<AppState>, Path(driver_id): Path<String>) -> Response {
    let driver_id = match parse_driver_id(&driver_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.stop(driver_id).await {
        Ok(()) => ok(serde_json::json!({ "driverId": driver_id, "stopped": true })),
        Err(err) => orchestrator_error(err),
    }
}

pub async fn sync_driver(State(state): State<AppState>, Path(driver_id): Path<String>) -> Response {
    let driver_id = match parse_driver_id(&driver_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.sync_now(driver_id).await {
        Ok(report) => ok(sync_report_to_dto(report)),
        Err(err) => orchestrator_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sim_state, upsert_live_device};
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_driver_is_not_running() {
        let (state, _) = sim_state();
        let response = get_driver(State(state), Path("7".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "DRIVER.NOT_RUNNING");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_driver_id_is_rejected() {
        let (state, _) = sim_state();
        let response = sync_driver(State(state), Path("abc".to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn start_sync_and_stop_driver() {
        let (state, devices) = sim_state();
        upsert_live_device(&devices, 1, "Press4");

        let response = start_driver(State(state.clone()), Path("1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["driverId"], 1);
        assert_eq!(body["data"]["lastSync"]["devicesAdded"], 1);

        let response = start_driver(State(state.clone()), Path("1".to_string())).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = sync_driver(State(state.clone()), Path("1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["alreadyPresent"], 1);

        let response = stop_driver(State(state.clone()), Path("1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = list_drivers(State(state)).await;
        let body = body_json(response).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }
}
