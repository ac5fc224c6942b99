//! Session record wire format and model helpers.

use voxherd::models::session::{SessionRecord, TransportDescriptor, TransportType};

#[test]
fn record_serializes_to_documented_shape() {
    let record = SessionRecord::new(123, "claude", TransportDescriptor::multiplexer("claude-123"));
    let value = serde_json::to_value(&record).expect("serialize");

    assert_eq!(value["owner_pid"], 123);
    assert_eq!(value["kind"], "claude");
    assert_eq!(value["transport"]["type"], "multiplexer");
    assert_eq!(value["transport"]["address"], "claude-123");
    assert!(value["created_at"].is_string());
}

#[test]
fn record_parses_external_json() {
    let raw = r#"{
        "owner_pid": 77,
        "kind": "assistant",
        "transport": {"type": "pipe", "address": "/run/voxherd/assistant-77.fifo"},
        "created_at": "2026-01-01T00:00:00Z"
    }"#;
    let record: SessionRecord = serde_json::from_str(raw).expect("parse");

    assert_eq!(record.owner_pid, 77);
    assert_eq!(record.transport.kind, TransportType::Pipe);
    assert_eq!(record.transport.address, "/run/voxherd/assistant-77.fifo");
}

#[test]
fn transport_key_joins_kind_and_pid() {
    assert_eq!(SessionRecord::transport_key("claude", 4242), "claude-4242");
}
