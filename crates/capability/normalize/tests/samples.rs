use domain::{Quality, TagNotification, TagValue};
use fleet_normalize::{DropReason, coerce, to_sample};

fn notification(value: TagValue, quality: Quality, ts: Option<i64>) -> TagNotification {
    TagNotification {
        value,
        quality,
        source_ts_ms: ts,
    }
}

#[test]
fn numeric_variants_coerce_to_f64() {
    assert_eq!(coerce(&TagValue::Int(-7)), Some(-7.0));
    assert_eq!(coerce(&TagValue::UInt(42)), Some(42.0));
    assert_eq!(coerce(&TagValue::Float(2.5)), Some(2.5));
    assert_eq!(
        coerce(&TagValue::DateTime(1_700_000_000_000)),
        Some(1_700_000_000_000.0)
    );
}

#[test]
fn good_notification_becomes_sample_with_source_timestamp() {
    let sample = to_sample(
        &notification(TagValue::String("12.5".to_string()), Quality::Good, Some(1_000)),
        9,
        "Temp",
        5_000,
    )
    .expect("sample");
    assert_eq!(sample.device_id, 9);
    assert_eq!(sample.tag_name, "Temp");
    assert_eq!(sample.value, 12.5);
    assert_eq!(sample.ts_ms, 1_000);
}

#[test]
fn missing_source_timestamp_falls_back_to_receive_time() {
    let sample = to_sample(
        &notification(TagValue::Bool(true), Quality::Good, None),
        1,
        "Running",
        5_000,
    )
    .expect("sample");
    assert_eq!(sample.ts_ms, 5_000);
    assert_eq!(sample.value, 1.0);
}

#[test]
fn non_good_and_null_notifications_are_dropped() {
    assert_eq!(
        to_sample(&notification(TagValue::Int(1), Quality::Bad, None), 1, "T", 0),
        Err(DropReason::NotGood(Quality::Bad))
    );
    assert_eq!(
        to_sample(
            &notification(TagValue::Int(1), Quality::Uncertain, None),
            1,
            "T",
            0
        ),
        Err(DropReason::NotGood(Quality::Uncertain))
    );
    assert_eq!(
        to_sample(&notification(TagValue::Null, Quality::Good, None), 1, "T", 0),
        Err(DropReason::NullValue)
    );
}
