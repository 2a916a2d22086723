use operant::audit::AuditSink;
use operant::context::RunContext;
use operant::journal::{ActionKind, Journal};
use operant::plan::{PlanError, PlanRunner, PlanStep, RetryPolicy, StepKind};
use operant::provider::ToolDefinition;
use operant::sandbox::SandboxPolicy;
use operant::tools::{ToolFailure, ToolRegistry, ToolServices};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Fixture {
    registry: ToolRegistry,
    sandbox: Arc<SandboxPolicy>,
    audit: Arc<AuditSink>,
    journal: Arc<Journal>,
}

impl Fixture {
    fn at(root: &Path) -> Self {
        let workspace = root.join("workspace");
        fs::create_dir_all(&workspace).expect("workspace");
        let audit = Arc::new(
            AuditSink::open(&root.join("logs/agent.log"), &root.join("audit.sqlite3"))
                .expect("audit sink"),
        );
        let sandbox = Arc::new(
            SandboxPolicy::new(
                &workspace,
                &[
                    r"^echo\s".to_string(),
                    r"^\./[\w./-]+\.sh(\s|$)".to_string(),
                ],
            )
            .expect("policy"),
        );
        let journal = Arc::new(Journal::new(&root.join("journal"), &root.join("backups")));
        let services = Arc::new(ToolServices {
            sandbox: sandbox.clone(),
            journal: journal.clone(),
            audit: audit.clone(),
            memo_path: root.join("memo.json"),
            search: None,
            gui: None,
        });
        Self {
            registry: ToolRegistry::with_builtins(services),
            sandbox,
            audit,
            journal,
        }
    }

    fn runner(self) -> (PlanRunner, Arc<AuditSink>, Arc<Journal>) {
        let audit = self.audit.clone();
        let journal = self.journal.clone();
        let runner = PlanRunner::new(Arc::new(self.registry), self.sandbox, self.audit);
        (runner, audit, journal)
    }
}

fn marker_tool(name: &str, seen: Arc<Mutex<Vec<String>>>) -> (ToolDefinition, impl Fn(&ToolServices, &RunContext, &serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, ToolFailure>) {
    let definition = ToolDefinition {
        name: name.to_string(),
        description: "records which step invoked it".to_string(),
        schema: json!({"type": "object", "properties": {"step": {"type": "string"}}, "required": ["step"]}),
    };
    let handler = move |_services: &ToolServices,
                        _ctx: &RunContext,
                        args: &serde_json::Map<String, serde_json::Value>| {
        let step = args
            .get("step")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        seen.lock().expect("marker lock").push(step);
        Ok(json!({"ok": true}))
    };
    (definition, handler)
}

fn marker_step(id: &str, deps: &[&str]) -> PlanStep {
    PlanStep::new(
        id,
        StepKind::Custom,
        json!({"tool": "marker", "args": {"step": id}}),
    )
    .with_deps(deps)
}

#[test]
fn demo_deterministic_scenario_applies_one_fallback() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::at(dir.path());
    let (runner, _audit, journal) = fixture.runner();
    let ctx = RunContext::new("run-s1");

    let script = "#!/usr/bin/env bash\necho \"Agent OK $(date -Iseconds)\"";
    let steps = vec![
        PlanStep::new(
            "s0",
            StepKind::Filesystem,
            json!({"operation": "write", "path": "/outside/main.sh", "content": script}),
        )
        .with_fallback(json!({"operation": "write", "path": "demo_v2/main.sh", "content": script})),
        PlanStep::new(
            "s1",
            StepKind::Filesystem,
            json!({"operation": "mkdir", "path": "demo_v2"}),
        )
        .with_deps(&["s0"]),
        PlanStep::new(
            "s2",
            StepKind::Filesystem,
            json!({"operation": "write", "path": "demo_v2/main.sh", "content": script}),
        )
        .with_deps(&["s1"]),
        PlanStep::new(
            "s3",
            StepKind::Filesystem,
            json!({"operation": "chmod", "path": "demo_v2/main.sh", "mode": "755"}),
        )
        .with_deps(&["s2"]),
        PlanStep::new(
            "s4",
            StepKind::Terminal,
            json!({"command": "./demo_v2/main.sh", "expect_contains": "Agent OK"}),
        )
        .with_deps(&["s3"]),
    ];

    let report = runner.run(&ctx, &steps).expect("plan succeeds");
    assert_eq!(report.steps, 5);
    assert_eq!(report.ok, 5);
    assert_eq!(report.retries, 0);
    assert_eq!(report.fallbacks, 1);

    // captured stdout carries the sentinel and a parseable timestamp.
    let entries = journal.entries("run-s1").expect("entries");
    let terminal = entries
        .iter()
        .find(|entry| entry.action == ActionKind::TerminalCommand)
        .expect("terminal entry");
    let stdout = terminal.after.as_deref().expect("captured stdout");
    assert!(stdout.contains("Agent OK"));
    let stamp = stdout
        .trim()
        .rsplit(' ')
        .next()
        .expect("timestamp token");
    chrono::DateTime::parse_from_rfc3339(stamp).expect("ISO-8601 timestamp");
}

#[test]
fn denied_step_without_fallback_aborts_and_touches_nothing() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::at(dir.path());
    let (runner, audit, journal) = fixture.runner();
    let ctx = RunContext::new("run-denied");

    let steps = vec![PlanStep::new(
        "s0",
        StepKind::Filesystem,
        json!({"operation": "write", "path": "/etc/passwd", "content": "oops"}),
    )];

    let err = runner.run(&ctx, &steps).expect_err("denied");
    match err {
        PlanError::StepFailed { step_id, reason } => {
            assert_eq!(step_id, "s0");
            assert!(reason.contains("path_outside_sandbox"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(journal.entries("run-denied").expect("entries").is_empty());

    let events = audit.events_for_run("run-denied").expect("events");
    assert!(events.iter().any(|event| event.event_type == "STEP_FAIL"));
}

#[test]
fn retry_policy_runs_three_attempts_with_growing_delays() {
    let dir = tempdir().expect("tempdir");
    let mut fixture = Fixture::at(dir.path());

    let invocations: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = invocations.clone();
    fixture.registry.register(
        ToolDefinition {
            name: "flaky".to_string(),
            description: "fails twice then succeeds".to_string(),
            schema: json!({"type": "object", "properties": {}}),
        },
        move |_services, _ctx, _args| {
            let mut seen = seen.lock().expect("lock");
            seen.push(Instant::now());
            if seen.len() < 3 {
                Err(ToolFailure::exec("transient outage"))
            } else {
                Ok(json!({"ok": true}))
            }
        },
    );
    let (runner, _audit, _journal) = fixture.runner();
    let ctx = RunContext::new("run-retry");

    let steps = vec![PlanStep::new(
        "flaky-step",
        StepKind::Custom,
        json!({"tool": "flaky", "args": {}}),
    )
    .with_retry(RetryPolicy {
        attempts: 3,
        base_delay_ms: 10,
        factor: 2.0,
        jitter: 0.0,
    })];

    let report = runner.run(&ctx, &steps).expect("succeeds on third try");
    assert_eq!(report.ok, 1);
    assert_eq!(report.retries, 2);

    let stamps = invocations.lock().expect("lock");
    assert_eq!(stamps.len(), 3);
    assert!(stamps[1] - stamps[0] >= Duration::from_millis(10));
    assert!(stamps[2] - stamps[1] >= Duration::from_millis(20));
}

#[test]
fn execution_order_is_a_linear_extension_of_the_dag() {
    let dir = tempdir().expect("tempdir");
    let mut fixture = Fixture::at(dir.path());

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (definition, handler) = marker_tool("marker", seen.clone());
    fixture.registry.register(definition, handler);
    let (runner, _audit, _journal) = fixture.runner();
    let ctx = RunContext::new("run-topo");

    let steps = vec![
        marker_step("deploy", &["build", "test"]),
        marker_step("test", &["build"]),
        marker_step("build", &[]),
    ];
    runner.run(&ctx, &steps).expect("plan succeeds");

    let order = seen.lock().expect("lock").clone();
    let position = |id: &str| order.iter().position(|step| step == id).expect("ran");
    assert_eq!(order.len(), 3);
    assert!(position("build") < position("test"));
    assert!(position("test") < position("deploy"));
}

#[test]
fn cyclic_plans_run_each_step_once_in_input_order() {
    let dir = tempdir().expect("tempdir");
    let mut fixture = Fixture::at(dir.path());

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (definition, handler) = marker_tool("marker", seen.clone());
    fixture.registry.register(definition, handler);
    let (runner, audit, _journal) = fixture.runner();
    let ctx = RunContext::new("run-cycle");

    let steps = vec![
        marker_step("chicken", &["egg"]),
        marker_step("egg", &["chicken"]),
    ];
    let report = runner.run(&ctx, &steps).expect("never refuses to run");
    assert_eq!(report.ok, 2);
    assert_eq!(*seen.lock().expect("lock"), vec!["chicken", "egg"]);

    let events = audit.events_for_run("run-cycle").expect("events");
    assert!(events.iter().any(|event| event.event_type == "PLAN_CYCLE"));
}

#[test]
fn verify_steps_check_file_presence_and_content() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::at(dir.path());
    let (runner, _audit, _journal) = fixture.runner();
    let ctx = RunContext::new("run-verify");

    let steps = vec![
        PlanStep::new(
            "write",
            StepKind::Filesystem,
            json!({"operation": "write", "path": "out.txt", "content": "payload ready"}),
        ),
        PlanStep::new(
            "check",
            StepKind::Verify,
            json!({"path": "out.txt", "contains": "ready"}),
        )
        .with_deps(&["write"]),
    ];
    let report = runner.run(&ctx, &steps).expect("verified");
    assert_eq!(report.ok, 2);

    let failing = vec![PlanStep::new(
        "check-missing",
        StepKind::Verify,
        json!({"path": "nope.txt"}),
    )];
    assert!(runner.run(&ctx, &failing).is_err());
}

#[test]
fn report_wire_shape_matches_the_contract() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::at(dir.path());
    let (runner, _audit, _journal) = fixture.runner();
    let ctx = RunContext::new("run-report");

    let steps = vec![PlanStep::new(
        "note",
        StepKind::Audit,
        json!({"message": "plan ran"}),
    )];
    let report = runner.run(&ctx, &steps).expect("plan succeeds");
    let wire = report.to_json();

    assert_eq!(wire["runId"], json!("run-report"));
    assert_eq!(wire["report"]["stats"]["steps"], json!(1));
    assert_eq!(wire["report"]["stats"]["ok"], json!(1));
    assert_eq!(wire["report"]["stats"]["retries"], json!(0));
    assert_eq!(wire["report"]["stats"]["fallbacks"], json!(0));
    assert!(wire["report"]["timings"]["totalMs"].is_u64());
    assert!(wire["report"]["generatedAt"].is_string());
}
