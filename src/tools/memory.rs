use super::schema::{object_schema, string_enum, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const TOOL_NAME: &str = "memory";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Store and recall facts across runs in the local key/value overlay."
            .to_string(),
        schema: object_schema(
            &[
                (
                    "operation",
                    string_enum(
                        "memory operation",
                        &["store", "retrieve", "search", "list"],
                    ),
                ),
                ("key", string_prop("memory key")),
                ("value", string_prop("value to store")),
                ("query", string_prop("substring to search for")),
            ],
            &["operation"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    _ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let operation = required_str(args, "operation")?;
    let memo_path = services.memo_path.as_path();
    match operation {
        "store" => {
            let key = required_str(args, "key")?;
            let value = required_str(args, "value")?;
            let mut memo = load(memo_path)?;
            memo.insert(key.to_string(), value.to_string());
            save(memo_path, &memo)?;
            Ok(json!({"stored": key}))
        }
        "retrieve" => {
            let key = required_str(args, "key")?;
            let memo = load(memo_path)?;
            Ok(json!({"key": key, "value": memo.get(key)}))
        }
        "search" => {
            let query = str_arg(args, "query")
                .or_else(|| str_arg(args, "key"))
                .ok_or_else(|| ToolFailure::validation("search requires `query`"))?
                .to_ascii_lowercase();
            let memo = load(memo_path)?;
            let matches: BTreeMap<_, _> = memo
                .into_iter()
                .filter(|(key, value)| {
                    key.to_ascii_lowercase().contains(&query)
                        || value.to_ascii_lowercase().contains(&query)
                })
                .collect();
            Ok(json!({"matches": matches}))
        }
        "list" => {
            let memo = load(memo_path)?;
            let keys: Vec<_> = memo.keys().cloned().collect();
            Ok(json!({"keys": keys}))
        }
        other => Err(ToolFailure::validation(format!(
            "unsupported memory operation `{other}`"
        ))),
    }
}

fn load(path: &Path) -> Result<BTreeMap<String, String>, ToolFailure> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|err| ToolFailure::exec(format!("memo parse failed: {err}"))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(ToolFailure::exec(format!(
            "memo read {} failed: {err}",
            path.display()
        ))),
    }
}

/// The overlay is shared by every run in the process, so a rewrite is
/// staged next to the memo and renamed into place rather than written
/// directly; readers always see a complete JSON document.
fn save(path: &Path, memo: &BTreeMap<String, String>) -> Result<(), ToolFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ToolFailure::exec(format!("mkdir {} failed: {err}", parent.display())))?;
    }
    let encoded = serde_json::to_vec_pretty(memo)
        .map_err(|err| ToolFailure::exec(format!("memo encode failed: {err}")))?;
    let stage = path.with_extension(format!("json.stage-{}", std::process::id()));
    fs::write(&stage, &encoded)
        .map_err(|err| ToolFailure::exec(format!("memo stage {} failed: {err}", stage.display())))?;
    fs::rename(&stage, path)
        .map_err(|err| ToolFailure::exec(format!("memo write {} failed: {err}", path.display())))
}
