use domain::{DriverConfig, Quality, SecurityMode, TagNotification, TagValue};
use fleet_gateway::SimulatedGateway;
use fleet_pipeline::{Pipeline, PipelineConfig, StorageSampleWriter};
use fleet_session::{
    MonitoredTag, OverflowPolicy, Placement, Session, SessionConfig, SessionError, SessionPool,
    SessionState,
};
use fleet_storage::InMemorySampleStore;
use std::sync::Arc;
use std::time::Duration;

fn driver() -> Arc<DriverConfig> {
    Arc::new(DriverConfig {
        driver_id: 1,
        name: "kep-1".to_string(),
        endpoint_url: "opc.tcp://sim:49320".to_string(),
        security_mode: SecurityMode::None,
        username: None,
        password: None,
        max_tags_per_session: 100,
        publishing_interval_ms: 1_000,
        namespace_prefix: DriverConfig::DEFAULT_NAMESPACE_PREFIX.to_string(),
        address_template: String::new(),
        config_api_url: "http://sim:57412".to_string(),
        config_api_username: None,
        config_api_password: None,
        enabled: true,
    })
}

fn tag(device_id: i64, name: &str) -> MonitoredTag {
    MonitoredTag {
        device_id,
        tag_name: name.to_string(),
        node_address: format!("ns=2;s=Line1.Dev{device_id}.{name}"),
    }
}

fn good(value: TagValue) -> TagNotification {
    TagNotification {
        value,
        quality: Quality::Good,
        source_ts_ms: Some(1_700_000_000_000),
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        reconnect_delay: Duration::from_secs(1),
        keep_alive_interval: Duration::from_secs(2),
        notification_buffer: 16,
    }
}

struct Harness {
    gateway: SimulatedGateway,
    store: Arc<InMemorySampleStore>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let store = Arc::new(InMemorySampleStore::new());
    let writer = Arc::new(StorageSampleWriter::new(store.clone(), None));
    let pipeline = Pipeline::start(
        writer,
        PipelineConfig {
            capacity: 100,
            batch_size: 10,
            flush_interval: Duration::from_millis(50),
        },
    );
    Harness {
        gateway: SimulatedGateway::new(),
        store,
        pipeline,
    }
}

impl Harness {
    fn start(&self, tags: Vec<MonitoredTag>) -> Session {
        Session::start(
            1,
            driver(),
            Arc::new(self.gateway.clone()),
            tags,
            self.pipeline.handle(),
            session_config(),
        )
    }
}

async fn wait_connected(session: &Session) {
    let mut state = session.watch_state();
    state
        .wait_for(SessionState::is_connected)
        .await
        .expect("state channel");
}

#[tokio::test(start_paused = true)]
async fn good_notifications_reach_the_pipeline() {
    let h = harness();
    let session = h.start(vec![tag(1, "Temp"), tag(1, "Running")]);
    wait_connected(&session).await;
    assert_eq!(h.gateway.monitored_addresses().len(), 2);

    let temp = "ns=2;s=Line1.Dev1.Temp";
    assert_eq!(h.gateway.publish(temp, good(TagValue::Float(21.5))).await, 1);
    assert_eq!(
        h.gateway
            .publish("ns=2;s=Line1.Dev1.Running", good(TagValue::Bool(true)))
            .await,
        1
    );
    let bad = TagNotification {
        value: TagValue::Float(99.0),
        quality: Quality::Bad,
        source_ts_ms: None,
    };
    assert_eq!(h.gateway.publish(temp, bad).await, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = session.stats();
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.dropped, 1);

    session.stop().await;
    h.pipeline.shutdown().await.expect("shutdown");
    let samples = h.store.samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].tag_name, "Temp");
    assert_eq!(samples[0].value, 21.5);
    assert_eq!(samples[1].value, 1.0);
}

#[tokio::test(start_paused = true)]
async fn initial_connect_failure_retries_until_connected() {
    let h = harness();
    h.gateway.fail_next_connects(2);
    let session = h.start(vec![tag(1, "Temp")]);
    wait_connected(&session).await;
    assert_eq!(session.stats().reconnects, 2);
    assert_eq!(h.gateway.open_session_count(), 1);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn keep_alive_failure_reconnects_and_resubscribes() {
    let h = harness();
    let session = h.start(vec![tag(1, "Temp")]);
    wait_connected(&session).await;

    h.gateway.set_keep_alive_failing(true);
    let mut state = session.watch_state();
    state
        .wait_for(|s| matches!(s, SessionState::Error(_)))
        .await
        .expect("state channel");
    assert!(h.gateway.monitored_addresses().is_empty());

    h.gateway.set_keep_alive_failing(false);
    wait_connected(&session).await;
    assert_eq!(session.stats().reconnects, 1);
    assert_eq!(
        h.gateway.monitored_addresses(),
        vec!["ns=2;s=Line1.Dev1.Temp".to_string()]
    );
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_device_removes_only_its_items() {
    let h = harness();
    let session = h.start(vec![tag(1, "Temp"), tag(1, "Speed"), tag(2, "Temp")]);
    wait_connected(&session).await;

    assert_eq!(session.unsubscribe_device(1).await.expect("unsubscribe"), 2);
    assert_eq!(
        h.gateway.monitored_addresses(),
        vec!["ns=2;s=Line1.Dev2.Temp".to_string()]
    );
    assert_eq!(session.stats().tag_count, 1);
    assert_eq!(session.unsubscribe_device(1).await.expect("unsubscribe"), 0);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn write_tag_goes_through_once() {
    let h = harness();
    let session = h.start(vec![tag(1, "Setpoint")]);
    wait_connected(&session).await;

    session
        .write_tag("ns=2;s=Line1.Dev1.Setpoint", TagValue::Int(42))
        .await
        .expect("write");
    h.gateway.fail_on("ns=2;s=Line1.Dev1.Locked");
    let rejected = session
        .write_tag("ns=2;s=Line1.Dev1.Locked", TagValue::Int(1))
        .await;
    assert!(matches!(rejected, Err(SessionError::Gateway(_))));
    assert_eq!(
        h.gateway.written_values(),
        vec![("ns=2;s=Line1.Dev1.Setpoint".to_string(), TagValue::Int(42))]
    );
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn write_while_disconnected_fails_fast() {
    let h = harness();
    h.gateway.fail_next_connects(usize::MAX);
    let session = h.start(vec![tag(1, "Temp")]);
    let result = session.write_tag("ns=2;s=Line1.Dev1.Temp", TagValue::Int(1)).await;
    assert!(matches!(result, Err(SessionError::NotConnected)));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_closes_the_connection() {
    let h = harness();
    let session = h.start(vec![tag(1, "Temp")]);
    wait_connected(&session).await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(h.gateway.open_session_count(), 0);
    assert!(h.gateway.monitored_addresses().is_empty());
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn pool_restart_replaces_session_and_tracks_load() {
    let h = harness();
    let pool = SessionPool::new(
        driver(),
        Arc::new(h.gateway.clone()),
        h.pipeline.handle(),
        session_config(),
    );
    assert_eq!(pool.place(5, 10), Placement::Assigned(1));

    pool.start_session(1, vec![tag(1, "Temp")]).await;
    pool.start_session(2, vec![tag(2, "Temp")]).await;
    pool.assign(1, 1, 10);
    pool.assign(2, 2, 3);
    assert_eq!(pool.place(5, 10), Placement::Assigned(2));

    let restarted = pool
        .restart_session(2, vec![tag(2, "Temp"), tag(3, "Temp")])
        .await;
    wait_connected(&restarted).await;
    assert_eq!(pool.session_count(), 2);
    assert_eq!(restarted.stats().tag_count, 2);

    assert_eq!(pool.unsubscribe_device(99).await.expect("unknown device"), 0);
    assert_eq!(pool.release(2), Some(2));
    assert_eq!(pool.session_of(2), None);

    let statuses = pool.statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].assigned_devices, 1);

    pool.stop_all().await;
    assert_eq!(pool.session_count(), 0);
    assert_eq!(h.gateway.open_session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn pool_placement_opens_sessions_then_applies_policy() {
    let h = harness();
    let pool = |policy| {
        SessionPool::new(
            driver(),
            Arc::new(h.gateway.clone()),
            h.pipeline.handle(),
            session_config(),
        )
        .with_limits(2, policy)
    };

    let skip = pool(OverflowPolicy::Skip);
    skip.assign(1, 1, 60);
    assert_eq!(skip.place(2, 60), Placement::Assigned(2));
    skip.assign(2, 2, 60);
    assert_eq!(skip.place(3, 30), Placement::Assigned(1));
    assert_eq!(skip.place(3, 60), Placement::Unassigned);
    // 设备自身的旧分配不计入负载
    assert_eq!(skip.place(2, 100), Placement::Assigned(2));

    let force = pool(OverflowPolicy::ForceAssign);
    force.assign(1, 1, 60);
    force.assign(2, 2, 70);
    assert_eq!(force.place(3, 60), Placement::Overflowed(1));
    assert_eq!(force.place(3, 60).session_id(), Some(1));
}
