use operant::audit::{event, AuditEvent, AuditSink, Severity};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[test]
fn events_append_with_increasing_ids_per_run() {
    let dir = tempdir().expect("tempdir");
    let sink = AuditSink::open(
        &dir.path().join("logs/agent.log"),
        &dir.path().join("audit.sqlite3"),
    )
    .expect("sink");

    let first = sink
        .record(&AuditEvent::new("run-a", event::AGENT_START, "starting"))
        .expect("record");
    let second = sink
        .record(
            &AuditEvent::new("run-a", event::TOOL_EXEC_START, "tool start")
                .with_data(json!({"tool": "filesystem"})),
        )
        .expect("record");
    sink.record(&AuditEvent::new("run-b", event::AGENT_START, "other run"))
        .expect("record");

    assert!(second > first);

    let events = sink.events_for_run("run-a").expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "AGENT_START");
    assert_eq!(events[1].event_type, "TOOL_EXEC_START");
    assert!(events[0].id < events[1].id);
    assert_eq!(events[1].data, json!({"tool": "filesystem"}).to_string());
    assert!(events[0].created_at.contains('T'));
}

#[test]
fn unknown_event_types_are_accepted() {
    let dir = tempdir().expect("tempdir");
    let sink = AuditSink::open(
        &dir.path().join("logs/agent.log"),
        &dir.path().join("audit.sqlite3"),
    )
    .expect("sink");

    sink.record(
        &AuditEvent::new("run-x", "SOMETHING_NOVEL", "new vocabulary")
            .with_severity(Severity::Debug),
    )
    .expect("record");

    let events = sink.events_for_run("run-x").expect("events");
    assert_eq!(events[0].event_type, "SOMETHING_NOVEL");
    assert_eq!(events[0].severity, "debug");
}

#[test]
fn stream_half_appends_one_line_per_event() {
    let dir = tempdir().expect("tempdir");
    let log_path = dir.path().join("logs/agent.log");
    let sink = AuditSink::open(&log_path, &dir.path().join("audit.sqlite3")).expect("sink");

    sink.record(&AuditEvent::new("run-log", event::STEP_START, "step one"))
        .expect("record");
    sink.record(&AuditEvent::new("run-log", event::STEP_END, "step one done"))
        .expect("record");

    let raw = fs::read_to_string(&log_path).expect("stream log");
    let lines: Vec<_> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("event=STEP_START"));
    assert!(lines[0].contains("run_id=run-log"));
    assert!(lines[1].contains("event=STEP_END"));
}

#[test]
fn store_reopens_and_keeps_prior_rows() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("audit.sqlite3");
    let log = dir.path().join("logs/agent.log");

    {
        let sink = AuditSink::open(&log, &db).expect("sink");
        sink.record(&AuditEvent::new("run-p", event::AGENT_START, "first session"))
            .expect("record");
    }

    let sink = AuditSink::open(&log, &db).expect("reopen");
    sink.record(&AuditEvent::new("run-p", event::AGENT_COMPLETE, "second session"))
        .expect("record");

    let events = sink.events_for_run("run-p").expect("events");
    assert_eq!(events.len(), 2);
}
