use super::schema::{object_schema, string_enum, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::audit::{event, AuditEvent, AuditSink, Severity};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(think_definition(), handle_think);
    registry.register(report_definition(), handle_report);
    registry.register(approval_definition(), handle_approval);
    registry.register(notify_definition(), handle_notify);
}

fn think_definition() -> ToolDefinition {
    ToolDefinition {
        name: "think".to_string(),
        description: "Record a reasoning note. No side effect; useful for working through \
            a problem before acting."
            .to_string(),
        schema: object_schema(
            &[("thought", string_prop("the reasoning note"))],
            &["thought"],
        ),
    }
}

fn handle_think(
    _services: &ToolServices,
    _ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let thought = required_str(args, "thought")?;
    Ok(json!({"recorded": true, "length": thought.len()}))
}

fn report_definition() -> ToolDefinition {
    ToolDefinition {
        name: "report".to_string(),
        description: "Send a structured status update to the user.".to_string(),
        schema: object_schema(
            &[
                (
                    "status",
                    string_enum(
                        "kind of update",
                        &["progress", "complete", "error", "info", "question"],
                    ),
                ),
                ("message", string_prop("the update text")),
            ],
            &["status", "message"],
        ),
    }
}

fn handle_report(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let status = required_str(args, "status")?;
    let message = required_str(args, "message")?;
    record(
        &services.audit,
        ctx,
        "REPORT",
        Severity::Info,
        message,
        json!({"status": status}),
    )?;
    Ok(json!({"reported": true, "status": status}))
}

fn approval_definition() -> ToolDefinition {
    ToolDefinition {
        name: "request_approval".to_string(),
        description: "Ask for approval before a consequential action. Low-impact requests \
            auto-approve; anything higher stays pending and is surfaced via notification."
            .to_string(),
        schema: object_schema(
            &[
                ("action", string_prop("what is about to be done")),
                ("reason", string_prop("why it is needed")),
                (
                    "impact",
                    string_enum("blast radius", &["low", "medium", "high", "critical"]),
                ),
            ],
            &["action", "reason"],
        ),
    }
}

fn handle_approval(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let action = required_str(args, "action")?;
    let reason = required_str(args, "reason")?;
    let impact = str_arg(args, "impact").unwrap_or("low");

    record(
        &services.audit,
        ctx,
        event::APPROVAL_REQUESTED,
        Severity::Info,
        action,
        json!({"action": action, "reason": reason, "impact": impact}),
    )?;

    if impact == "low" {
        return Ok(json!({"approved": true, "status": "auto_approved", "impact": impact}));
    }

    record(
        &services.audit,
        ctx,
        event::NOTIFICATION_SENT,
        Severity::Warn,
        format!("approval pending for: {action}"),
        json!({"action": action, "impact": impact}),
    )?;
    Ok(json!({"approved": false, "status": "pending", "impact": impact}))
}

fn notify_definition() -> ToolDefinition {
    ToolDefinition {
        name: "notify".to_string(),
        description: "Send the user a notification outside the conversation.".to_string(),
        schema: object_schema(
            &[
                ("message", string_prop("notification body")),
                ("title", string_prop("optional title")),
            ],
            &["message"],
        ),
    }
}

fn handle_notify(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let message = required_str(args, "message")?;
    let title = str_arg(args, "title").unwrap_or("operant");
    record(
        &services.audit,
        ctx,
        event::NOTIFICATION_SENT,
        Severity::Info,
        message,
        json!({"title": title}),
    )?;
    Ok(json!({"sent": true}))
}

fn record(
    audit: &AuditSink,
    ctx: &RunContext,
    event_type: &str,
    severity: Severity,
    message: impl Into<String>,
    data: Value,
) -> Result<(), ToolFailure> {
    audit
        .record(
            &AuditEvent::new(&ctx.run_id, event_type, message)
                .with_severity(severity)
                .with_data(data),
        )
        .map(|_| ())
        .map_err(|err| ToolFailure::exec(err.to_string()))
}
