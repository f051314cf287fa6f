use domain::{Channel, Device, DriverConfig, OperationKind, SecurityMode};
use fleet_gateway::{DATA_COLLECTION_PROPERTY, NAME_PROPERTY, SimulatedGateway};
use fleet_pipeline::{NoopWriter, Pipeline, PipelineConfig};
use fleet_provision::{
    OperationLocks, ProcessOutcome, ProvisionConfig, ProvisioningEngine, Provisioner,
    RestartRequest, SkipReason, spawn_provisioning_loop,
};
use fleet_session::{OverflowPolicy, SessionConfig, SessionPool};
use fleet_storage::{DeviceStore, InMemoryDeviceStore, InMemoryTagStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn driver(max_tags_per_session: usize) -> Arc<DriverConfig> {
    Arc::new(DriverConfig {
        driver_id: 1,
        name: "kep-1".to_string(),
        endpoint_url: "opc.tcp://sim:49320".to_string(),
        security_mode: SecurityMode::None,
        username: None,
        password: None,
        max_tags_per_session,
        publishing_interval_ms: 1_000,
        namespace_prefix: DriverConfig::DEFAULT_NAMESPACE_PREFIX.to_string(),
        address_template: String::new(),
        config_api_url: "http://sim:57412".to_string(),
        config_api_username: None,
        config_api_password: None,
        enabled: true,
    })
}

fn device(id: i64, name: &str, status: i32) -> Device {
    Device {
        id,
        driver_id: 1,
        channel_name: "Line1".to_string(),
        name: name.to_string(),
        device_type_id: 7,
        definition: json!({ NAME_PROPERTY: name, DATA_COLLECTION_PROPERTY: true }),
        status,
        session_id: None,
    }
}

struct Harness {
    gateway: SimulatedGateway,
    devices: Arc<InMemoryDeviceStore>,
    tags: Arc<InMemoryTagStore>,
    sessions: Arc<SessionPool>,
    engine: Arc<ProvisioningEngine>,
    restarts: mpsc::UnboundedReceiver<RestartRequest>,
    _pipeline: Pipeline,
}

fn harness() -> Harness {
    harness_with(100, 10, OverflowPolicy::ForceAssign)
}

fn harness_with(max_tags_per_session: usize, max_sessions: usize, policy: OverflowPolicy) -> Harness {
    let gateway = SimulatedGateway::with_reserved_channels();
    let devices = Arc::new(InMemoryDeviceStore::new());
    let tags = Arc::new(InMemoryTagStore::new());
    devices
        .upsert_channel(Channel {
            driver_id: 1,
            name: "Line1".to_string(),
            definition: json!({ NAME_PROPERTY: "Line1" }),
        })
        .expect("channel");
    tags.add_type_tag(7, "Temp", json!({ "servermain.TAG_ADDRESS": "40001" }))
        .expect("tag");
    tags.add_type_tag(7, "Speed", json!({ "servermain.TAG_ADDRESS": "40002" }))
        .expect("tag");

    let pipeline = Pipeline::start(Arc::new(NoopWriter), PipelineConfig::default());
    let sessions = Arc::new(
        SessionPool::new(
            driver(max_tags_per_session),
            Arc::new(gateway.clone()),
            pipeline.handle(),
            SessionConfig::default(),
        )
        .with_limits(max_sessions, policy),
    );
    let provisioner = Arc::new(Provisioner::new(
        devices.clone(),
        tags.clone(),
        Arc::new(gateway.clone()),
        2,
        Duration::from_millis(100),
    ));
    let (restart_tx, restarts) = mpsc::unbounded_channel();
    let engine = ProvisioningEngine::new(
        provisioner,
        sessions.clone(),
        OperationLocks::new(),
        ProvisionConfig::default(),
    )
    .with_restart_sender(restart_tx);
    Harness {
        gateway,
        devices,
        tags,
        sessions,
        engine: Arc::new(engine),
        restarts,
        _pipeline: pipeline,
    }
}

#[tokio::test(start_paused = true)]
async fn add_builds_device_on_gateway_and_requests_one_restart() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");

    let outcome = h.engine.process_device_operation(1, 10, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 11 });

    assert!(h.gateway.has_channel("Line1"));
    assert!(h.gateway.has_device("Line1", "Press4"));
    assert_eq!(h.gateway.tag_names("Line1", "Press4"), vec!["Speed", "Temp"]);
    assert_eq!(h.devices.status_of(1), Some(11));

    let stored = h.devices.find_device(1).await.expect("find").expect("device");
    assert_eq!(stored.session_id, Some(1));
    assert_eq!(h.sessions.session_of(1), Some(1));

    let restart = h.restarts.try_recv().expect("restart request");
    assert_eq!(restart.session_id, 1);
    assert_eq!(restart.kind, OperationKind::Add);
    assert!(h.restarts.try_recv().is_err());
    assert!(!h.engine.locks().is_locked(1));
}

#[tokio::test(start_paused = true)]
async fn add_succeeds_when_objects_already_exist() {
    let h = harness();
    h.gateway.insert_device("Line1", "Press4");
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");

    let outcome = h.engine.process_device_operation(1, 10, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 11 });
    assert_eq!(h.gateway.tag_names("Line1", "Press4").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_step_records_failure_without_restart() {
    let mut h = harness();
    h.gateway.fail_on("Line1.Press4.Speed");
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");

    let outcome = h.engine.process_device_operation(1, 10, 1).await;
    assert!(matches!(outcome, ProcessOutcome::Failed { status: 12, .. }));
    assert_eq!(h.devices.status_of(1), Some(12));
    assert!(h.restarts.try_recv().is_err());
    assert!(!h.engine.locks().is_locked(1));
    assert_eq!(h.sessions.session_of(1), None);
}

#[tokio::test(start_paused = true)]
async fn locked_device_is_skipped_not_queued() {
    let h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");

    let guard = h.engine.locks().try_acquire(1).expect("lock");
    let outcome = h.engine.process_device_operation(1, 10, 1).await;
    assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::AlreadyRunning));
    assert_eq!(h.devices.status_of(1), Some(10));
    assert!(h.gateway.calls().is_empty());
    drop(guard);

    let outcome = h.engine.process_device_operation(1, 11, 1).await;
    assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::NotPending));
}

#[tokio::test(start_paused = true)]
async fn delete_removes_device_and_empties_channel() {
    let h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.devices.upsert_device(device(2, "Press5", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.engine.process_device_operation(2, 10, 1).await;

    h.devices.update_device_status(1, 20).await.expect("status");
    let outcome = h.engine.process_device_operation(1, 20, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 21 });
    assert!(!h.gateway.has_device("Line1", "Press4"));
    assert!(h.gateway.has_channel("Line1"));
    let stored = h.devices.find_device(1).await.expect("find").expect("device");
    assert_eq!(stored.session_id, None);
    assert_eq!(h.sessions.session_of(1), None);

    h.devices.update_device_status(2, 20).await.expect("status");
    let outcome = h.engine.process_device_operation(2, 20, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 21 });
    assert!(!h.gateway.has_channel("Line1"));
    assert!(h.gateway.has_channel("_System"));
}

#[tokio::test(start_paused = true)]
async fn deactivate_and_activate_patch_data_collection() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");

    let outcome = h.engine.process_device_operation(1, 50, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 51 });
    let pushed = h
        .gateway
        .device_definition("Line1", "Press4")
        .expect("definition");
    assert_eq!(pushed[DATA_COLLECTION_PROPERTY], false);
    let stored = h.devices.find_device(1).await.expect("find").expect("device");
    assert_eq!(stored.definition[DATA_COLLECTION_PROPERTY], false);

    let outcome = h.engine.process_device_operation(1, 40, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 41 });
    let pushed = h
        .gateway
        .device_definition("Line1", "Press4")
        .expect("definition");
    assert_eq!(pushed[DATA_COLLECTION_PROPERTY], true);
    assert!(h.restarts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn tag_update_recreates_tags_on_same_session() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");

    h.tags
        .add_device_tag(1, "Pressure", json!({ "servermain.TAG_ADDRESS": "40003" }))
        .expect("tag");
    let outcome = h.engine.process_device_operation(1, 60, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 61 });
    assert_eq!(
        h.gateway.tag_names("Line1", "Press4"),
        vec!["Pressure", "Speed", "Temp"]
    );
    let restart = h.restarts.try_recv().expect("tag update restart");
    assert_eq!(restart.kind, OperationKind::TagUpdate);
    assert_eq!(restart.session_id, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_channel_template_fails_add() {
    let h = harness();
    let mut orphan = device(3, "Robot1", 10);
    orphan.channel_name = "Line9".to_string();
    h.devices.upsert_device(orphan).expect("device");

    let outcome = h.engine.process_device_operation(3, 10, 1).await;
    assert!(matches!(outcome, ProcessOutcome::Failed { status: 12, .. }));
    assert!(!h.gateway.has_channel("Line9"));
}

#[tokio::test(start_paused = true)]
async fn provisioning_loop_dispatches_pending_devices() {
    let h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.devices.upsert_device(device(2, "Press5", 10)).expect("device");

    let cancel = CancellationToken::new();
    let worker = spawn_provisioning_loop(
        h.engine.clone(),
        1,
        Duration::from_secs(1),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();
    worker.await.expect("worker");

    assert_eq!(h.devices.status_of(1), Some(11));
    assert_eq!(h.devices.status_of(2), Some(11));
    assert_eq!(h.engine.locks().held_count(), 0);
}


#[tokio::test(start_paused = true)]
async fn failed_activate_records_42_and_keeps_definition() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");
    h.engine.process_device_operation(1, 50, 1).await;

    h.gateway.fail_on("Line1.Press4");
    let outcome = h.engine.process_device_operation(1, 40, 1).await;
    assert!(matches!(outcome, ProcessOutcome::Failed { status: 42, .. }));
    assert_eq!(h.devices.status_of(1), Some(42));
    let stored = h.devices.find_device(1).await.expect("find").expect("device");
    assert_eq!(stored.definition[DATA_COLLECTION_PROPERTY], false);
    assert!(h.restarts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn update_rebuilds_device_and_restarts_its_session_once() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");
    let before = h.gateway.calls().len();

    let outcome = h.engine.process_device_operation(1, 30, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 31 });
    assert_eq!(h.devices.status_of(1), Some(31));

    let calls = h.gateway.calls().split_off(before);
    assert!(calls.contains(&"create_channel Line1".to_string()));
    let deleted = calls
        .iter()
        .position(|call| call == "delete_device Line1.Press4")
        .expect("device deleted");
    let created = calls
        .iter()
        .position(|call| call == "create_device Line1.Press4")
        .expect("device recreated");
    assert!(deleted < created);
    assert_eq!(h.gateway.tag_names("Line1", "Press4"), vec!["Speed", "Temp"]);

    let restart = h.restarts.try_recv().expect("update restart");
    assert_eq!(restart.kind, OperationKind::Update);
    assert_eq!(restart.session_id, 1);
    assert!(h.restarts.try_recv().is_err());
    assert_eq!(h.sessions.session_of(1), Some(1));
}

#[tokio::test(start_paused = true)]
async fn failed_update_records_32_without_restart() {
    let mut h = harness();
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");

    h.gateway.fail_on("Line1.Press4");
    let outcome = h.engine.process_device_operation(1, 30, 1).await;
    assert!(matches!(outcome, ProcessOutcome::Failed { status: 32, .. }));
    assert_eq!(h.devices.status_of(1), Some(32));
    assert!(h.restarts.try_recv().is_err());
    assert!(!h.engine.locks().is_locked(1));
}

#[tokio::test(start_paused = true)]
async fn concurrent_operations_on_one_device_run_once() {
    let h = harness();
    h.gateway.set_call_delay(Duration::from_millis(50));
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");

    let (first, second) = tokio::join!(
        h.engine.process_device_operation(1, 10, 1),
        h.engine.process_device_operation(1, 10, 1),
    );
    let outcomes = [first, second];
    let skipped = outcomes
        .iter()
        .filter(|outcome| **outcome == ProcessOutcome::Skipped(SkipReason::AlreadyRunning))
        .count();
    assert_eq!(skipped, 1);
    assert!(outcomes.contains(&ProcessOutcome::Succeeded { status: 11 }));

    let creates = h
        .gateway
        .calls()
        .into_iter()
        .filter(|call| call == "create_device Line1.Press4")
        .count();
    assert_eq!(creates, 1);
    assert!(!h.engine.locks().is_locked(1));
}

#[tokio::test(start_paused = true)]
async fn runtime_add_opens_new_session_within_budget() {
    let mut h = harness_with(2, 2, OverflowPolicy::Skip);
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.devices.upsert_device(device(2, "Press5", 10)).expect("device");

    h.engine.process_device_operation(1, 10, 1).await;
    let outcome = h.engine.process_device_operation(2, 10, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 11 });
    assert_eq!(h.sessions.session_of(1), Some(1));
    assert_eq!(h.sessions.session_of(2), Some(2));
    assert_eq!(h.restarts.try_recv().expect("first").session_id, 1);
    assert_eq!(h.restarts.try_recv().expect("second").session_id, 2);
}

#[tokio::test(start_paused = true)]
async fn runtime_add_beyond_budget_follows_overflow_policy() {
    let mut h = harness_with(2, 1, OverflowPolicy::Skip);
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.devices.upsert_device(device(2, "Press5", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.restarts.try_recv().expect("add restart");

    let outcome = h.engine.process_device_operation(2, 10, 1).await;
    assert_eq!(outcome, ProcessOutcome::Succeeded { status: 11 });
    assert!(h.gateway.has_device("Line1", "Press5"));
    let stored = h.devices.find_device(2).await.expect("find").expect("device");
    assert_eq!(stored.session_id, None);
    assert_eq!(h.sessions.session_of(2), None);
    assert!(h.restarts.try_recv().is_err());

    let mut h = harness_with(2, 1, OverflowPolicy::ForceAssign);
    h.devices.upsert_device(device(1, "Press4", 10)).expect("device");
    h.devices.upsert_device(device(2, "Press5", 10)).expect("device");
    h.engine.process_device_operation(1, 10, 1).await;
    h.engine.process_device_operation(2, 10, 1).await;
    assert_eq!(h.sessions.session_of(2), Some(1));
    assert_eq!(h.restarts.try_recv().expect("first").session_id, 1);
    assert_eq!(h.restarts.try_recv().expect("second").session_id, 1);
}
