//! 路由定义
//!
//! - 健康检查：/health, /metrics
//! - 驱动：/drivers, /drivers/:driver_id[/start|/stop|/sync]
//!
//! 支持 / 和 /api/ 两种前缀。

use super::AppState;
use super::handlers::*;
use crate::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/drivers", get(list_drivers))
        .route("/drivers/:driver_id", get(get_driver))
        .route("/drivers/:driver_id/start", post(start_driver))
        .route("/drivers/:driver_id/stop", post(stop_driver))
        .route("/drivers/:driver_id/sync", post(sync_driver))
}

pub fn create_app(state: AppState) -> Router {
    let api = create_api_router();
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_context)),
        )
}
