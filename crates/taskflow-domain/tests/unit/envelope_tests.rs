//! Unit tests for the event envelope wire codec

use chrono::{TimeZone, Utc};
use taskflow_domain::{AttributeValue, Error, EventEnvelope};

fn buy_milk() -> EventEnvelope {
    EventEnvelope::builder("task.created", "t1")
        .attribute("userId", "u1")
        .attribute("title", "Buy milk")
        .emitted_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .build()
        .expect("valid envelope")
}

#[test]
fn test_encode_matches_wire_contract() {
    let bytes = buy_milk().encode().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(
        text,
        r#"{"type":"task.created","taskId":"t1","title":"Buy milk","userId":"u1","timestamp":"2024-01-01T00:00:00Z"}"#
    );
}

#[test]
fn test_identical_envelopes_encode_identically() {
    let a = buy_milk();
    let b = EventEnvelope::builder("task.created", "t1")
        .attribute("title", "Buy milk")
        .attribute("userId", "u1")
        .emitted_at(a.emitted_at())
        .build()
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.encode().unwrap(), b.encode().unwrap());
}

#[test]
fn test_decode_round_trip_preserves_all_fields() {
    let original = EventEnvelope::builder("task.updated", "t-42")
        .attribute("userId", "u1")
        .attribute("priority", 3_i64)
        .attribute("dueAt", Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap())
        .attribute("note", "2024-02-01T08:30:00Z")
        .build()
        .unwrap();

    let decoded = EventEnvelope::decode(&original.encode().unwrap()).unwrap();

    assert_eq!(decoded, original);
    assert_eq!(decoded.event_type(), "task.updated");
    assert_eq!(decoded.correlation_id(), "t-42");
    assert_eq!(
        decoded.attribute("dueAt").unwrap().as_timestamp(),
        Some(Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap())
    );
    assert_eq!(decoded.text_attribute("note"), Some("2024-02-01T08:30:00Z"));
}

#[test]
fn test_timestamp_looking_text_is_kept_verbatim() {
    let title = "2024-01-01T02:00:00.000+02:00";
    let original = EventEnvelope::builder("task.created", "t1")
        .attribute("title", title)
        .attribute("note", AttributeValue::Text("2024-01-01T00:00:00Z".to_string()))
        .emitted_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .build()
        .unwrap();

    let bytes = original.encode().unwrap();
    let wire = String::from_utf8(bytes.clone()).unwrap();
    assert!(wire.contains(r#""title":"2024-01-01T02:00:00.000+02:00""#), "{wire}");

    let decoded = EventEnvelope::decode(&bytes).unwrap();
    assert_eq!(decoded, original);
    assert_eq!(decoded.text_attribute("title"), Some(title));
    assert_eq!(
        decoded.attribute("note"),
        Some(&AttributeValue::Text("2024-01-01T00:00:00Z".to_string()))
    );
}

#[test]
fn test_decode_accepts_any_key_order() {
    let json = br#"{"timestamp":"2024-01-01T00:00:00Z","title":"Buy milk","userId":"u1","taskId":"t1","type":"task.created"}"#;
    let decoded = EventEnvelope::decode(json).unwrap();
    assert_eq!(decoded, buy_milk());
}

#[test]
fn test_decode_converts_emission_time_to_utc() {
    let json = br#"{"type":"task.created","taskId":"t1","timestamp":"2024-01-01T02:00:00+02:00"}"#;
    let decoded = EventEnvelope::decode(json).unwrap();
    assert_eq!(
        decoded.emitted_at(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_decode_rejects_non_json() {
    let err = EventEnvelope::decode(b"not json at all").unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
}

#[test]
fn test_decode_rejects_missing_required_fields() {
    for json in [
        &br#"{"taskId":"t1","timestamp":"2024-01-01T00:00:00Z"}"#[..],
        &br#"{"type":"task.created","timestamp":"2024-01-01T00:00:00Z"}"#[..],
        &br#"{"type":"task.created","taskId":"t1"}"#[..],
    ] {
        let err = EventEnvelope::decode(json).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err}");
    }
}

#[test]
fn test_decode_rejects_nested_and_boolean_attributes() {
    let nested = br#"{"type":"x","taskId":"t1","timestamp":"2024-01-01T00:00:00Z","meta":{"a":1}}"#;
    let boolean = br#"{"type":"x","taskId":"t1","timestamp":"2024-01-01T00:00:00Z","done":true}"#;
    assert!(matches!(EventEnvelope::decode(nested), Err(Error::Decode { .. })));
    assert!(matches!(EventEnvelope::decode(boolean), Err(Error::Decode { .. })));
}

#[test]
fn test_decode_rejects_bad_timestamp_and_empty_type() {
    let bad_ts = br#"{"type":"task.created","taskId":"t1","timestamp":"yesterday"}"#;
    let empty_type = br#"{"type":"","taskId":"t1","timestamp":"2024-01-01T00:00:00Z"}"#;
    assert!(matches!(EventEnvelope::decode(bad_ts), Err(Error::Decode { .. })));
    assert!(matches!(EventEnvelope::decode(empty_type), Err(Error::Decode { .. })));
}

#[test]
fn test_builder_rejects_reserved_attribute_keys() {
    let err = EventEnvelope::builder("task.created", "t1")
        .attribute("timestamp", "now")
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn test_builder_requires_type_and_correlation_id() {
    assert!(EventEnvelope::builder(" ", "t1").build().is_err());
    assert!(EventEnvelope::builder("task.created", "").build().is_err());
}

#[test]
fn test_builder_stamps_emission_time() {
    let before = Utc::now();
    let envelope = EventEnvelope::builder("task.created", "t1").build().unwrap();
    assert!(envelope.emitted_at() >= before);
}

#[test]
fn test_attribute_value_accessors() {
    assert_eq!(AttributeValue::from("plain").as_text(), Some("plain"));
    assert!(AttributeValue::from("plain").as_timestamp().is_none());
    assert_eq!(
        AttributeValue::from("2024-01-01T02:00:00+02:00").as_text(),
        Some("2024-01-01T02:00:00+02:00")
    );
    assert_eq!(
        AttributeValue::from("2024-01-01T02:00:00+02:00").as_timestamp(),
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(
        AttributeValue::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).as_text(),
        Some("2024-01-01T00:00:00Z")
    );
    assert!(AttributeValue::from(7_u64).as_number().is_some());
    assert_eq!(AttributeValue::from(7_u64).to_string(), "7");
}

#[test]
fn test_peek_event_type_ignores_other_fields() {
    let loose = br#"{"type":"user.deleted","userId":"u1","active":false,"meta":{"a":1}}"#;
    assert_eq!(EventEnvelope::peek_event_type(loose).unwrap(), "user.deleted");
    assert_eq!(
        EventEnvelope::peek_event_type(&buy_milk().encode().unwrap()).unwrap(),
        "task.created"
    );
}

#[test]
fn test_peek_event_type_requires_a_type() {
    for body in [
        &b"not json"[..],
        &br#"["task.created"]"#[..],
        &br#"{"taskId":"t1"}"#[..],
        &br#"{"type":42}"#[..],
        &br#"{"type":" "}"#[..],
    ] {
        let err = EventEnvelope::peek_event_type(body).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err}");
    }
}
