use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{post, put};
use axum::{Json, Router};
use fleet_gateway::{
    ApplyOutcome, GatewayConfigApi, GatewayError, RestConfigOptions, RestGatewayConfig,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

async fn create_channel(
    State(recorder): State<Recorder>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let name = body["common.ALLTYPES_NAME"].as_str().unwrap_or_default();
    let auth = headers.contains_key("authorization");
    recorder.push(format!("POST channels {name} auth={auth}"));
    if name == "Existing" {
        return (
            StatusCode::BAD_REQUEST,
            format!("{{\"message\":\"Object '{name}' already exists\"}}"),
        );
    }
    (StatusCode::CREATED, String::new())
}

async fn update_channel(
    State(recorder): State<Recorder>,
    Path(name): Path<String>,
) -> StatusCode {
    recorder.push(format!("PUT channels/{name}"));
    StatusCode::OK
}

async fn delete_channel(
    State(recorder): State<Recorder>,
    Path(name): Path<String>,
) -> StatusCode {
    recorder.push(format!("DELETE channels/{name}"));
    if name == "Gone" {
        return StatusCode::NOT_FOUND;
    }
    StatusCode::OK
}

async fn create_device(
    State(recorder): State<Recorder>,
    Path(channel): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let name = body["common.ALLTYPES_NAME"].as_str().unwrap_or_default();
    recorder.push(format!("POST channels/{channel}/devices {name}"));
    if name == "Broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "driver error".to_string());
    }
    if name == "Locked" {
        return (StatusCode::CONFLICT, String::new());
    }
    (StatusCode::CREATED, String::new())
}

async fn update_device(
    State(recorder): State<Recorder>,
    Path((channel, device)): Path<(String, String)>,
) -> (StatusCode, String) {
    recorder.push(format!("PUT channels/{channel}/devices/{device}"));
    if device == "Locked" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "project is locked".to_string(),
        );
    }
    (StatusCode::OK, String::new())
}

async fn spawn_gateway(recorder: Recorder) -> String {
    let app = Router::new()
        .route("/config/v1/project/channels", post(create_channel))
        .route(
            "/config/v1/project/channels/:name",
            put(update_channel).delete(delete_channel),
        )
        .route("/config/v1/project/channels/:name/devices", post(create_device))
        .route(
            "/config/v1/project/channels/:name/devices/:device",
            put(update_device).delete(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(recorder);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn client(base_url: String) -> RestGatewayConfig {
    RestGatewayConfig::new(RestConfigOptions {
        base_url,
        username: Some("administrator".to_string()),
        password: Some("secret".to_string()),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
    })
    .expect("client")
}

#[tokio::test]
async fn channel_create_falls_back_to_update_when_it_exists() {
    let recorder = Recorder::default();
    let api = client(spawn_gateway(recorder.clone()).await);

    let created = api
        .create_or_update_channel(&json!({ "common.ALLTYPES_NAME": "Line1" }))
        .await
        .expect("create");
    assert_eq!(created, ApplyOutcome::Created);

    let updated = api
        .create_or_update_channel(&json!({ "common.ALLTYPES_NAME": "Existing" }))
        .await
        .expect("update");
    assert_eq!(updated, ApplyOutcome::Updated);

    assert_eq!(
        recorder.calls(),
        vec![
            "POST channels Line1 auth=true".to_string(),
            "POST channels Existing auth=true".to_string(),
            "PUT channels/Existing".to_string(),
        ]
    );
}

#[tokio::test]
async fn deleting_missing_objects_succeeds() {
    let recorder = Recorder::default();
    let api = client(spawn_gateway(recorder.clone()).await);

    api.delete_channel("Gone").await.expect("not found is ok");
    api.delete_channel("Line1").await.expect("deleted");
    api.delete_device("Line1", "Press4").await.expect("deleted");
    assert_eq!(
        recorder.calls(),
        vec![
            "DELETE channels/Gone".to_string(),
            "DELETE channels/Line1".to_string(),
        ]
    );
}

#[tokio::test]
async fn gateway_errors_surface_status_and_body() {
    let recorder = Recorder::default();
    let api = client(spawn_gateway(recorder.clone()).await);

    let err = api
        .create_or_update_device("Line1", &json!({ "common.ALLTYPES_NAME": "Broken" }))
        .await
        .expect_err("rejected");
    match err {
        GatewayError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "driver error");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = api
        .create_or_update_device("Line1", &json!({ "name": "NoKepwareName" }))
        .await
        .expect_err("invalid");
    assert!(matches!(err, GatewayError::InvalidDefinition(_)));
}

#[tokio::test]
async fn failed_update_after_conflict_is_an_error() {
    let recorder = Recorder::default();
    let api = client(spawn_gateway(recorder.clone()).await);

    let err = api
        .create_or_update_device("Line1", &json!({ "common.ALLTYPES_NAME": "Locked" }))
        .await
        .expect_err("update rejected");
    match err {
        GatewayError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "project is locked");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        recorder.calls(),
        vec![
            "POST channels/Line1/devices Locked".to_string(),
            "PUT channels/Line1/devices/Locked".to_string(),
        ]
    );
}
