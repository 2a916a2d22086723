use operant::audit::AuditSink;
use operant::context::RunContext;
use operant::journal::Journal;
use operant::sandbox::SandboxPolicy;
use operant::tools::{FailureKind, ToolRegistry, ToolServices};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn registry_at(root: &Path) -> (ToolRegistry, Arc<AuditSink>) {
    let workspace = root.join("workspace");
    fs::create_dir_all(&workspace).expect("workspace");
    let audit = Arc::new(
        AuditSink::open(&root.join("logs/agent.log"), &root.join("audit.sqlite3"))
            .expect("audit sink"),
    );
    let services = Arc::new(ToolServices {
        sandbox: Arc::new(
            SandboxPolicy::new(
                &workspace,
                &[r"^echo\s".to_string(), r"^false$".to_string()],
            )
            .expect("policy"),
        ),
        journal: Arc::new(Journal::new(&root.join("journal"), &root.join("backups"))),
        audit: audit.clone(),
        memo_path: root.join("memo.json"),
        search: None,
        gui: None,
    });
    (ToolRegistry::with_builtins(services), audit)
}

#[test]
fn filesystem_denial_outside_sandbox_runs_no_effectful_code() {
    let dir = tempdir().expect("tempdir");
    let (registry, audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-s6");

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "write", "path": "/etc/passwd", "content": "oops"}),
    );

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Denied: path_outside_sandbox")
    );
    assert_eq!(outcome.kind, Some(FailureKind::Denied));

    let events = audit.events_for_run("run-s6").expect("events");
    assert!(events
        .iter()
        .any(|event| event.event_type == "TOOL_EXEC_ERROR"));
}

#[test]
fn invalid_arguments_fail_validation_before_the_handler() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-validate");

    let outcome = registry.execute(&ctx, "filesystem", &json!({"operation": "write"}));
    assert!(!outcome.success);
    assert_eq!(outcome.kind, Some(FailureKind::Validation));
    assert!(outcome.error.expect("error").contains("path"));

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "transmogrify", "path": "a.txt"}),
    );
    assert_eq!(outcome.kind, Some(FailureKind::Validation));
}

#[test]
fn write_read_delete_round_trip_with_journal_entries() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-fs");

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "write", "path": "notes/plan.txt", "content": "v1"}),
    );
    assert!(outcome.success, "write failed: {:?}", outcome.error);

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "read", "path": "notes/plan.txt"}),
    );
    let output = outcome.output.expect("read output");
    assert_eq!(output["content"], json!("v1"));

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "write", "path": "notes/plan.txt", "content": "v2"}),
    );
    assert!(outcome.success);

    let outcome = registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "delete", "path": "notes/plan.txt"}),
    );
    assert!(outcome.success);
    assert!(!dir.path().join("workspace/notes/plan.txt").exists());
}

#[test]
fn terminal_respects_the_whitelist_and_captures_output() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-term");

    let outcome = registry.execute(&ctx, "terminal", &json!({"command": "echo hello"}));
    assert!(outcome.success);
    let output = outcome.output.expect("output");
    assert_eq!(output["stdout"], json!("hello\n"));
    assert_eq!(output["exit_code"], json!(0));

    let outcome = registry.execute(&ctx, "terminal", &json!({"command": "rm -rf /"}));
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Denied: terminal_cmd_not_whitelisted")
    );

    let outcome = registry.execute(&ctx, "terminal", &json!({"command": "false"}));
    assert!(!outcome.success);
    assert_eq!(outcome.kind, Some(FailureKind::Exec));
}

#[test]
fn editor_replace_journals_full_before_and_after() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-edit");

    let target = dir.path().join("workspace/config.txt");
    fs::write(&target, "port = 8080\nhost = local\n").expect("seed");

    let outcome = registry.execute(
        &ctx,
        "editor",
        &json!({
            "operation": "replace",
            "path": "config.txt",
            "old_text": "8080",
            "new_text": "9090",
        }),
    );
    assert!(outcome.success, "edit failed: {:?}", outcome.error);
    assert_eq!(
        fs::read_to_string(&target).expect("read"),
        "port = 9090\nhost = local\n"
    );
}

#[test]
fn unknown_tools_fail_without_an_mcp_owner() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-unknown");

    let outcome = registry.execute(&ctx, "teleport", &json!({}));
    assert!(!outcome.success);
    assert!(outcome.error.expect("error").contains("unknown tool"));
}

#[test]
fn memory_tool_persists_across_registry_instances() {
    let dir = tempdir().expect("tempdir");
    let ctx = RunContext::new("run-memo");

    {
        let (registry, _audit) = registry_at(dir.path());
        let outcome = registry.execute(
            &ctx,
            "memory",
            &json!({"operation": "store", "key": "owner", "value": "ops team"}),
        );
        assert!(outcome.success);
    }

    let (registry, _audit) = registry_at(dir.path());
    let outcome = registry.execute(
        &ctx,
        "memory",
        &json!({"operation": "retrieve", "key": "owner"}),
    );
    assert_eq!(
        outcome.output.expect("output")["value"],
        json!("ops team")
    );

    let outcome = registry.execute(
        &ctx,
        "memory",
        &json!({"operation": "search", "query": "team"}),
    );
    assert!(outcome.success);
}

#[test]
fn approval_auto_approves_low_impact_only() {
    let dir = tempdir().expect("tempdir");
    let (registry, audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-approval");

    let outcome = registry.execute(
        &ctx,
        "request_approval",
        &json!({"action": "write report", "reason": "routine", "impact": "low"}),
    );
    assert_eq!(outcome.output.expect("output")["approved"], json!(true));

    let outcome = registry.execute(
        &ctx,
        "request_approval",
        &json!({"action": "wipe database", "reason": "cleanup", "impact": "critical"}),
    );
    let output = outcome.output.expect("output");
    assert_eq!(output["approved"], json!(false));
    assert_eq!(output["status"], json!("pending"));

    let events = audit.events_for_run("run-approval").expect("events");
    assert_eq!(
        events
            .iter()
            .filter(|event| event.event_type == "APPROVAL_REQUESTED")
            .count(),
        2
    );
    assert!(events
        .iter()
        .any(|event| event.event_type == "NOTIFICATION_SENT"));
}

#[test]
fn journal_tool_rolls_back_its_own_run() {
    let dir = tempdir().expect("tempdir");
    let (registry, _audit) = registry_at(dir.path());
    let ctx = RunContext::new("run-selfjournal");

    registry.execute(
        &ctx,
        "filesystem",
        &json!({"operation": "write", "path": "scratch.txt", "content": "scratch"}),
    );
    assert!(dir.path().join("workspace/scratch.txt").exists());

    let outcome = registry.execute(&ctx, "journal", &json!({"operation": "rollback_run"}));
    assert!(outcome.success);
    assert_eq!(outcome.output.expect("output")["success"], json!(true));
    assert!(!dir.path().join("workspace/scratch.txt").exists());
}
