use super::schema::{object_schema, string_enum, string_prop};
use super::{required_str, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};

pub const TOOL_NAME: &str = "journal";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Inspect the action journal and roll back reversible effects, one \
            entry at a time or a whole run in reverse order."
            .to_string(),
        schema: object_schema(
            &[
                (
                    "operation",
                    string_enum(
                        "journal operation",
                        &["list_runs", "view", "summary", "rollback_entry", "rollback_run"],
                    ),
                ),
                ("run_id", string_prop("run whose journal to address")),
                ("entry_id", string_prop("entry to roll back (rollback_entry)")),
            ],
            &["operation"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let operation = required_str(args, "operation")?;
    let journal = &services.journal;

    match operation {
        "list_runs" => {
            let runs = journal
                .list_runs()
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            Ok(json!({"runs": runs}))
        }
        "view" => {
            let run_id = run_id_arg(args, ctx)?;
            let entries = journal
                .entries(&run_id)
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            let encoded = serde_json::to_value(&entries)
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            Ok(json!({"run_id": run_id, "entries": encoded}))
        }
        "summary" => {
            let run_id = run_id_arg(args, ctx)?;
            let summary = journal
                .summary(&run_id)
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            serde_json::to_value(summary).map_err(|err| ToolFailure::exec(err.to_string()))
        }
        "rollback_entry" => {
            let run_id = run_id_arg(args, ctx)?;
            let entry_id = required_str(args, "entry_id")?;
            journal
                .rollback_entry(&run_id, entry_id)
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            Ok(json!({"rolled_back": entry_id}))
        }
        "rollback_run" => {
            let run_id = run_id_arg(args, ctx)?;
            let outcome = journal
                .rollback_run(&run_id)
                .map_err(|err| ToolFailure::exec(err.to_string()))?;
            serde_json::to_value(outcome).map_err(|err| ToolFailure::exec(err.to_string()))
        }
        other => Err(ToolFailure::validation(format!(
            "unsupported journal operation `{other}`"
        ))),
    }
}

fn run_id_arg(args: &Map<String, Value>, ctx: &RunContext) -> Result<String, ToolFailure> {
    Ok(args
        .get("run_id")
        .and_then(Value::as_str)
        .unwrap_or(&ctx.run_id)
        .to_string())
}
