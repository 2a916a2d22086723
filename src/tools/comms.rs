use super::schema::{object_schema, string_prop};
use super::{required_str, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};

/// Outbound communication tools. Delivery itself belongs to external
/// adapters; here each send is journaled as a non-reversible action and
/// handed to whatever transport the embedding layer attaches. There is
/// no exactly-once guarantee.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(email_definition(), handle_email);
    registry.register(calendar_definition(), handle_calendar);
    registry.register(chat_definition(), handle_chat);
}

fn email_definition() -> ToolDefinition {
    ToolDefinition {
        name: "email".to_string(),
        description: "Queue an outbound email through the configured mail adapter."
            .to_string(),
        schema: object_schema(
            &[
                ("to", string_prop("recipient address")),
                ("subject", string_prop("subject line")),
                ("body", string_prop("message body")),
            ],
            &["to", "subject"],
        ),
    }
}

fn handle_email(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let to = required_str(args, "to")?;
    let subject = required_str(args, "subject")?;
    let entry = services
        .journal
        .record_email_send(&ctx.run_id, to, subject)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({"queued": true, "to": to, "journal_entry": entry.id}))
}

fn calendar_definition() -> ToolDefinition {
    ToolDefinition {
        name: "calendar".to_string(),
        description: "Create a calendar event through the configured calendar adapter."
            .to_string(),
        schema: object_schema(
            &[
                ("title", string_prop("event title")),
                ("start", string_prop("ISO-8601 start time")),
                ("end", string_prop("ISO-8601 end time")),
            ],
            &["title"],
        ),
    }
}

fn handle_calendar(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let title = required_str(args, "title")?;
    let entry = services
        .journal
        .record_calendar_event(&ctx.run_id, title)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({"queued": true, "title": title, "journal_entry": entry.id}))
}

fn chat_definition() -> ToolDefinition {
    ToolDefinition {
        name: "chat".to_string(),
        description: "Send a chat message through the configured chat adapter.".to_string(),
        schema: object_schema(
            &[
                ("recipient", string_prop("channel or user to message")),
                ("message", string_prop("message text")),
            ],
            &["recipient", "message"],
        ),
    }
}

fn handle_chat(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let recipient = required_str(args, "recipient")?;
    let entry = services
        .journal
        .record_chat_message(&ctx.run_id, recipient)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({"queued": true, "recipient": recipient, "journal_entry": entry.id}))
}
