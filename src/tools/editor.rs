use super::schema::{integer_prop, object_schema, string_enum, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};
use std::fs;

pub const TOOL_NAME: &str = "editor";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Edit an existing file in place: replace text, insert lines, delete a \
            line range or rewrite the whole content. Every edit is journaled with the full \
            before and after state."
            .to_string(),
        schema: object_schema(
            &[
                (
                    "operation",
                    string_enum(
                        "edit operation",
                        &["replace", "insert", "delete_lines", "patch"],
                    ),
                ),
                ("path", string_prop("file to edit, relative to the workspace")),
                ("old_text", string_prop("text to replace (replace)")),
                ("new_text", string_prop("replacement or inserted text")),
                ("line", integer_prop("one-based line number to insert before (insert)")),
                ("start_line", integer_prop("first line to delete (delete_lines)")),
                ("end_line", integer_prop("last line to delete (delete_lines)")),
                ("content", string_prop("full new content (patch)")),
            ],
            &["operation", "path"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let operation = required_str(args, "operation")?;
    let path = services
        .sandbox
        .resolve_path(required_str(args, "path")?)
        .map_err(ToolFailure::denied)?;

    let before = fs::read_to_string(&path)
        .map_err(|err| ToolFailure::exec(format!("read {} failed: {err}", path.display())))?;

    let after = match operation {
        "replace" => replace(&before, args)?,
        "insert" => insert(&before, args)?,
        "delete_lines" => delete_lines(&before, args)?,
        "patch" => str_arg(args, "content")
            .ok_or_else(|| ToolFailure::validation("patch requires `content`"))?
            .to_string(),
        other => {
            return Err(ToolFailure::validation(format!(
                "unsupported editor operation `{other}`"
            )))
        }
    };

    fs::write(&path, &after)
        .map_err(|err| ToolFailure::exec(format!("write {} failed: {err}", path.display())))?;
    let entry = services
        .journal
        .record_file_modify(
            &ctx.run_id,
            &path,
            &before,
            &after,
            &format!("editor {operation} on {}", path.display()),
        )
        .map_err(|err| ToolFailure::exec(err.to_string()))?;

    Ok(json!({
        "path": path.display().to_string(),
        "operation": operation,
        "bytes": after.len(),
        "journal_entry": entry.id,
    }))
}

fn replace(before: &str, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let old_text = required_str(args, "old_text")?;
    let new_text = str_arg(args, "new_text").unwrap_or_default();
    if old_text.is_empty() {
        return Err(ToolFailure::validation("`old_text` must be non-empty"));
    }
    if !before.contains(old_text) {
        return Err(ToolFailure::exec(format!(
            "`old_text` not found in file: {old_text:?}"
        )));
    }
    Ok(before.replacen(old_text, new_text, 1))
}

fn insert(before: &str, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let new_text = required_str(args, "new_text")?;
    let line = args
        .get("line")
        .and_then(Value::as_u64)
        .ok_or_else(|| ToolFailure::validation("insert requires a one-based `line`"))?;
    if line == 0 {
        return Err(ToolFailure::validation("`line` is one-based"));
    }
    let mut lines: Vec<&str> = before.lines().collect();
    let index = ((line - 1) as usize).min(lines.len());
    lines.insert(index, new_text);
    Ok(rejoin(&lines, before))
}

fn delete_lines(before: &str, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let start = args
        .get("start_line")
        .and_then(Value::as_u64)
        .ok_or_else(|| ToolFailure::validation("delete_lines requires `start_line`"))?;
    let end = args
        .get("end_line")
        .and_then(Value::as_u64)
        .unwrap_or(start);
    if start == 0 || end < start {
        return Err(ToolFailure::validation(
            "`start_line` is one-based and `end_line` must not precede it",
        ));
    }
    let lines: Vec<&str> = before.lines().collect();
    if start as usize > lines.len() {
        return Err(ToolFailure::exec(format!(
            "`start_line` {start} is past the end of the file ({} lines)",
            lines.len()
        )));
    }
    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(index, _)| {
            let line = index + 1;
            line < start as usize || line > end as usize
        })
        .map(|(_, line)| *line)
        .collect();
    Ok(rejoin(&kept, before))
}

fn rejoin(lines: &[&str], original: &str) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') && !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arg_map(raw: Value) -> Map<String, Value> {
        raw.as_object().expect("object").clone()
    }

    #[test]
    fn replace_swaps_first_occurrence_only() {
        let after = replace(
            "aaa bbb aaa\n",
            &arg_map(json!({"old_text": "aaa", "new_text": "xxx"})),
        )
        .expect("replace");
        assert_eq!(after, "xxx bbb aaa\n");
    }

    #[test]
    fn insert_is_one_based() {
        let after = insert(
            "one\ntwo\n",
            &arg_map(json!({"new_text": "zero", "line": 1})),
        )
        .expect("insert");
        assert_eq!(after, "zero\none\ntwo\n");
    }

    #[test]
    fn delete_lines_removes_inclusive_range() {
        let after = delete_lines(
            "one\ntwo\nthree\nfour\n",
            &arg_map(json!({"start_line": 2, "end_line": 3})),
        )
        .expect("delete");
        assert_eq!(after, "one\nfour\n");
    }

    #[test]
    fn missing_old_text_is_an_execution_error() {
        let err = replace("abc\n", &arg_map(json!({"old_text": "zzz"}))).expect_err("not found");
        assert_eq!(err.kind, crate::tools::FailureKind::Exec);
    }
}
