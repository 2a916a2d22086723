use super::schema::{object_schema, string_enum, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const TOOL_NAME: &str = "filesystem";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Read, write and manage files inside the sandboxed workspace. \
            Writes and deletions are journaled and reversible."
            .to_string(),
        schema: object_schema(
            &[
                (
                    "operation",
                    string_enum(
                        "filesystem operation to perform",
                        &[
                            "read", "write", "mkdir", "chmod", "list", "delete", "move", "copy",
                        ],
                    ),
                ),
                ("path", string_prop("target path, relative to the workspace")),
                ("content", string_prop("file content for write")),
                ("mode", string_prop("octal permission string for chmod, e.g. 755")),
                (
                    "destination",
                    string_prop("destination path for move and copy"),
                ),
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
    let raw_path = required_str(args, "path")?;
    let path = resolve(services, raw_path)?;

    match operation {
        "read" => read(&path),
        "write" => write(services, ctx, &path, args),
        "mkdir" => mkdir(services, ctx, &path),
        "chmod" => chmod(&path, args),
        "list" => list(&path),
        "delete" => delete(services, ctx, &path),
        "move" => rename(services, ctx, &path, args),
        "copy" => copy(services, ctx, &path, args),
        other => Err(ToolFailure::validation(format!(
            "unsupported filesystem operation `{other}`"
        ))),
    }
}

fn resolve(services: &ToolServices, raw: &str) -> Result<PathBuf, ToolFailure> {
    services
        .sandbox
        .resolve_path(raw)
        .map_err(ToolFailure::denied)
}

fn read(path: &Path) -> Result<Value, ToolFailure> {
    let content = fs::read_to_string(path)
        .map_err(|err| ToolFailure::exec(format!("read {} failed: {err}", path.display())))?;
    Ok(json!({"path": path.display().to_string(), "content": content}))
}

fn write(
    services: &ToolServices,
    ctx: &RunContext,
    path: &Path,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let content = str_arg(args, "content").unwrap_or_default();
    let before = match fs::read_to_string(path) {
        Ok(existing) => Some(existing),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(ToolFailure::exec(format!(
                "read {} failed: {err}",
                path.display()
            )))
        }
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ToolFailure::exec(format!("mkdir {} failed: {err}", parent.display())))?;
    }
    fs::write(path, content)
        .map_err(|err| ToolFailure::exec(format!("write {} failed: {err}", path.display())))?;

    let journaled = match before {
        Some(before) => services.journal.record_file_modify(
            &ctx.run_id,
            path,
            &before,
            content,
            &format!("overwrote file {}", path.display()),
        ),
        None => services
            .journal
            .record_file_create(&ctx.run_id, path, content),
    };
    let entry = journaled.map_err(|err| ToolFailure::exec(err.to_string()))?;

    Ok(json!({
        "path": path.display().to_string(),
        "bytes": content.len(),
        "journal_entry": entry.id,
    }))
}

fn mkdir(services: &ToolServices, ctx: &RunContext, path: &Path) -> Result<Value, ToolFailure> {
    let existed = path.is_dir();
    fs::create_dir_all(path)
        .map_err(|err| ToolFailure::exec(format!("mkdir {} failed: {err}", path.display())))?;
    let mut entry_id = None;
    if !existed {
        let entry = services
            .journal
            .record_directory_create(&ctx.run_id, path)
            .map_err(|err| ToolFailure::exec(err.to_string()))?;
        entry_id = Some(entry.id);
    }
    Ok(json!({
        "path": path.display().to_string(),
        "created": !existed,
        "journal_entry": entry_id,
    }))
}

#[cfg(unix)]
fn chmod(path: &Path, args: &Map<String, Value>) -> Result<Value, ToolFailure> {
    use std::os::unix::fs::PermissionsExt;

    let mode_raw = required_str(args, "mode")?;
    let mode = u32::from_str_radix(mode_raw, 8).map_err(|_| {
        ToolFailure::validation(format!("mode `{mode_raw}` is not an octal permission string"))
    })?;
    let mut perms = fs::metadata(path)
        .map_err(|err| ToolFailure::exec(format!("stat {} failed: {err}", path.display())))?
        .permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
        .map_err(|err| ToolFailure::exec(format!("chmod {} failed: {err}", path.display())))?;
    Ok(json!({"path": path.display().to_string(), "mode": mode_raw}))
}

#[cfg(not(unix))]
fn chmod(path: &Path, _args: &Map<String, Value>) -> Result<Value, ToolFailure> {
    Ok(json!({"path": path.display().to_string(), "mode": null}))
}

fn list(path: &Path) -> Result<Value, ToolFailure> {
    let entries = fs::read_dir(path)
        .map_err(|err| ToolFailure::exec(format!("list {} failed: {err}", path.display())))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| ToolFailure::exec(format!("list {} failed: {err}", path.display())))?;
        let mut name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(json!({"path": path.display().to_string(), "entries": names}))
}

fn delete(services: &ToolServices, ctx: &RunContext, path: &Path) -> Result<Value, ToolFailure> {
    let before = fs::read_to_string(path)
        .map_err(|err| ToolFailure::exec(format!("read {} failed: {err}", path.display())))?;
    fs::remove_file(path)
        .map_err(|err| ToolFailure::exec(format!("delete {} failed: {err}", path.display())))?;
    let entry = services
        .journal
        .record_file_delete(&ctx.run_id, path, &before)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({
        "path": path.display().to_string(),
        "journal_entry": entry.id,
    }))
}

/// A move journals as delete-source plus create-destination so rollback
/// restores the source and removes the destination.
fn rename(
    services: &ToolServices,
    ctx: &RunContext,
    path: &Path,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let destination = resolve(services, required_str(args, "destination")?)?;
    let content = fs::read_to_string(path)
        .map_err(|err| ToolFailure::exec(format!("read {} failed: {err}", path.display())))?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ToolFailure::exec(format!("mkdir {} failed: {err}", parent.display())))?;
    }
    fs::rename(path, &destination).map_err(|err| {
        ToolFailure::exec(format!(
            "move {} -> {} failed: {err}",
            path.display(),
            destination.display()
        ))
    })?;
    services
        .journal
        .record_file_delete(&ctx.run_id, path, &content)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    let entry = services
        .journal
        .record_file_create(&ctx.run_id, &destination, &content)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({
        "from": path.display().to_string(),
        "to": destination.display().to_string(),
        "journal_entry": entry.id,
    }))
}

fn copy(
    services: &ToolServices,
    ctx: &RunContext,
    path: &Path,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let destination = resolve(services, required_str(args, "destination")?)?;
    let content = fs::read_to_string(path)
        .map_err(|err| ToolFailure::exec(format!("read {} failed: {err}", path.display())))?;
    let existing = match fs::read_to_string(&destination) {
        Ok(existing) => Some(existing),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(ToolFailure::exec(format!(
                "read {} failed: {err}",
                destination.display()
            )))
        }
    };
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ToolFailure::exec(format!("mkdir {} failed: {err}", parent.display())))?;
    }
    fs::write(&destination, &content).map_err(|err| {
        ToolFailure::exec(format!("write {} failed: {err}", destination.display()))
    })?;
    let entry = match existing {
        Some(before) => services.journal.record_file_modify(
            &ctx.run_id,
            &destination,
            &before,
            &content,
            &format!("copied {} over {}", path.display(), destination.display()),
        ),
        None => services
            .journal
            .record_file_create(&ctx.run_id, &destination, &content),
    }
    .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(json!({
        "from": path.display().to_string(),
        "to": destination.display().to_string(),
        "journal_entry": entry.id,
    }))
}
