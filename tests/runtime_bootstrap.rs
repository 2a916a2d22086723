use operant::config::Settings;
use operant::plan::{PlanStep, StepKind};
use operant::runtime::Runtime;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[test]
fn bootstrap_wires_services_and_runs_a_plan() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings::rooted_at(dir.path());
    let runtime = Runtime::bootstrap(settings).expect("bootstrap");
    let ctx = runtime.new_run_context();

    let steps = vec![
        PlanStep::new(
            "write",
            StepKind::Filesystem,
            json!({"operation": "write", "path": "hello.txt", "content": "hello"}),
        ),
        PlanStep::new(
            "check",
            StepKind::Verify,
            json!({"path": "hello.txt", "contains": "hello"}),
        )
        .with_deps(&["write"]),
    ];
    let report = runtime.run_steps(&ctx, &steps).expect("plan succeeds");
    assert_eq!(report.ok, 2);
    assert_eq!(report.run_id, ctx.run_id);

    // persisted layout: durable audit store, stream log and per-run
    // journal file all land where the settings say.
    assert!(dir.path().join("data/audit.sqlite3").exists());
    assert!(dir.path().join("data/logs/agent.log").exists());
    assert!(dir
        .path()
        .join(format!("state/journal/{}.jsonl", ctx.run_id))
        .exists());
    assert!(dir.path().join("workspace/hello.txt").exists());

    let events = runtime.audit().events_for_run(&ctx.run_id).expect("events");
    assert!(events.iter().any(|event| event.event_type == "RUN_REPORT"));

    runtime.shutdown();
}

#[test]
fn minted_run_contexts_are_unique() {
    let dir = tempdir().expect("tempdir");
    let runtime = Runtime::bootstrap(Settings::rooted_at(dir.path())).expect("bootstrap");
    let first = runtime.new_run_context();
    let second = runtime.new_run_context();
    assert_ne!(first.run_id, second.run_id);
    runtime.shutdown();
}

#[test]
fn rollback_through_the_runtime_journal_restores_state() {
    let dir = tempdir().expect("tempdir");
    let runtime = Runtime::bootstrap(Settings::rooted_at(dir.path())).expect("bootstrap");
    let ctx = runtime.new_run_context();

    let steps = vec![PlanStep::new(
        "write",
        StepKind::Filesystem,
        json!({"operation": "write", "path": "ephemeral.txt", "content": "temp"}),
    )];
    runtime.run_steps(&ctx, &steps).expect("plan succeeds");
    let target = dir.path().join("workspace/ephemeral.txt");
    assert!(target.exists());

    let outcome = runtime
        .journal()
        .rollback_run(&ctx.run_id)
        .expect("rollback");
    assert!(outcome.success);
    assert!(!target.exists());
    runtime.shutdown();
}

#[test]
fn settings_yaml_round_trips_through_bootstrap() {
    let dir = tempdir().expect("tempdir");
    let yaml = format!(
        "data_dir: {root}/data\nstate_dir: {root}/state\nsandbox:\n  allowed_root: {root}/ws\n",
        root = dir.path().display()
    );
    let config_path = dir.path().join("operant.yaml");
    fs::write(&config_path, yaml).expect("write config");

    let settings = Settings::from_path(&config_path).expect("parse");
    let runtime = Runtime::bootstrap(settings).expect("bootstrap");
    assert_eq!(
        runtime.settings().sandbox.allowed_root,
        dir.path().join("ws")
    );
    runtime.shutdown();
}
