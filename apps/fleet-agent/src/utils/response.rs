//! HTTP 响应辅助函数和 DTO 转换
//!
//! - 错误响应：not_running_error, bad_request_error, orchestrator_error
//! - DTO 转换：driver_status_to_dto, sync_report_to_dto, metrics_to_dto

use api_contract::{
    ApiResponse, DriverStatusDto, MetricsSnapshotDto, PipelineStatsDto, SessionStatusDto,
    SyncReportDto,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::DriverId;
use fleet_orchestrator::{DriverStatus, OrchestratorError};
use fleet_pipeline::PipelineStatsSnapshot;
use fleet_reconcile::SyncReport;
use fleet_session::{SessionState, SessionStatus};
use fleet_telemetry::MetricsSnapshot;

pub fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 驱动未运行
pub fn not_running_error(driver_id: DriverId) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            "DRIVER.NOT_RUNNING",
            format!("driver {driver_id} is not running"),
        )),
    )
        .into_response()
}

pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 编排错误到 HTTP 状态码的映射
pub fn orchestrator_error(err: OrchestratorError) -> Response {
    let (status, code) = match &err {
        OrchestratorError::NotRunning(_) => (StatusCode::NOT_FOUND, "DRIVER.NOT_RUNNING"),
        OrchestratorError::DriverNotFound(_) => (StatusCode::NOT_FOUND, "DRIVER.NOT_FOUND"),
        OrchestratorError::DriverDisabled(_) => (StatusCode::CONFLICT, "DRIVER.DISABLED"),
        OrchestratorError::AlreadyRunning(_) => (StatusCode::CONFLICT, "DRIVER.ALREADY_RUNNING"),
        OrchestratorError::Reconcile(_) | OrchestratorError::Gateway(_) => {
            (StatusCode::BAD_GATEWAY, "GATEWAY.UNAVAILABLE")
        }
        OrchestratorError::Storage(_) | OrchestratorError::Pipeline(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL.ERROR")
        }
    };
    (status, Json(ApiResponse::<()>::error(code, err.to_string()))).into_response()
}

pub fn driver_status_to_dto(status: DriverStatus) -> DriverStatusDto {
    DriverStatusDto {
        driver_id: status.driver_id,
        name: status.name,
        sessions: status.sessions.into_iter().map(session_status_to_dto).collect(),
        pipeline: pipeline_stats_to_dto(status.pipeline),
        operations_in_flight: status.operations_in_flight,
        required_sessions: status.required_sessions,
        overflowed_devices: status.overflowed,
        unassigned_devices: status.unassigned,
        last_sync: status.last_sync.map(sync_report_to_dto),
    }
}

fn session_status_to_dto(status: SessionStatus) -> SessionStatusDto {
    let error = match &status.state {
        SessionState::Error(reason) => Some(reason.clone()),
        _ => None,
    };
    SessionStatusDto {
        session_id: status.session_id,
        state: status.state.as_str().to_string(),
        error,
        assigned_devices: status.assigned_devices,
        tag_count: status.stats.tag_count,
        messages_received: status.stats.messages_received,
        dropped: status.stats.dropped,
        reconnects: status.stats.reconnects,
    }
}

fn pipeline_stats_to_dto(stats: PipelineStatsSnapshot) -> PipelineStatsDto {
    PipelineStatsDto {
        received: stats.received,
        processed: stats.processed,
        queued: stats.queued,
        batches: stats.batches,
        error_batches: stats.error_batches,
        error_samples: stats.error_samples,
        dropped_invalid: stats.dropped_invalid,
        last_flush_ms: stats.last_flush_ms,
    }
}

pub fn sync_report_to_dto(report: SyncReport) -> SyncReportDto {
    SyncReportDto {
        desired_channels: report.desired_channels,
        desired_devices: report.desired_devices,
        already_present: report.already_present,
        channels_added: report.channels_added,
        devices_added: report.devices_added,
        tags_added: report.tags_added,
        extra_channels: report.extra_channels,
        extra_devices: report.extra_devices,
        failed: report.failed,
        still_missing: report.still_missing,
        total_ms: report.total_ms,
    }
}

pub fn metrics_to_dto(snapshot: MetricsSnapshot) -> MetricsSnapshotDto {
    MetricsSnapshotDto {
        notifications_received: snapshot.notifications_received,
        samples_dropped_bad_quality: snapshot.samples_dropped_bad_quality,
        samples_dropped_invalid: snapshot.samples_dropped_invalid,
        samples_written: snapshot.samples_written,
        write_batch_failure: snapshot.write_batch_failure,
        backpressure: snapshot.backpressure,
        write_latency_ms_total: snapshot.write_latency_ms_total,
        write_latency_ms_count: snapshot.write_latency_ms_count,
        provision_success: snapshot.provision_success,
        provision_failure: snapshot.provision_failure,
        provision_skipped: snapshot.provision_skipped,
        reconcile_runs: snapshot.reconcile_runs,
        reconcile_added: snapshot.reconcile_added,
        reconcile_failed: snapshot.reconcile_failed,
        session_reconnects: snapshot.session_reconnects,
        session_restarts: snapshot.session_restarts,
        write_back_success: snapshot.write_back_success,
        write_back_failure: snapshot.write_back_failure,
    }
}
