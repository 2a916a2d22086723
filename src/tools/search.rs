use super::schema::{object_schema, string_enum, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};

pub const TOOL_NAME: &str = "search";

/// Narrow seam between the search tool and the router so the tool layer
/// does not depend on provider selection. The runtime wires this to a
/// search-task completion.
pub trait SearchDelegate: Send + Sync {
    fn search(&self, ctx: &RunContext, query: &str, kind: &str) -> Result<String, String>;
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Query the web, news, code or documentation through the \
            search-optimized provider."
            .to_string(),
        schema: object_schema(
            &[
                ("query", string_prop("what to search for")),
                (
                    "kind",
                    string_enum("search corpus", &["web", "news", "code", "docs"]),
                ),
            ],
            &["query"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let query = required_str(args, "query")?;
    let kind = str_arg(args, "kind").unwrap_or("web");
    let delegate = services
        .search
        .as_ref()
        .ok_or_else(|| ToolFailure::exec("no search provider configured"))?;
    let result = delegate
        .search(ctx, query, kind)
        .map_err(ToolFailure::exec)?;
    Ok(json!({"query": query, "kind": kind, "result": result}))
}
