use fleet_telemetry::{metrics, new_request_ids, record_reconcile_run};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn reconcile_counters_accumulate() {
    let before = metrics().snapshot();
    record_reconcile_run(3, 1);
    let after = metrics().snapshot();
    assert!(after.reconcile_runs >= before.reconcile_runs + 1);
    assert!(after.reconcile_added >= before.reconcile_added + 3);
    assert!(after.reconcile_failed >= before.reconcile_failed + 1);
}
