use super::schema::{object_schema, string_prop};
use super::{required_str, str_arg, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use crate::sandbox::EffectRequest;
use serde_json::{json, Map, Value};
use std::io::{BufReader, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const TOOL_NAME: &str = "terminal";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Run a whitelisted shell command and capture stdout, stderr and the \
            exit code. Commands are journaled and cannot be rolled back."
            .to_string(),
        schema: object_schema(
            &[
                ("command", string_prop("shell command to run")),
                (
                    "cwd",
                    string_prop("working directory, relative to the workspace"),
                ),
            ],
            &["command"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let command = required_str(args, "command")?;

    if let crate::sandbox::Decision::Deny { reason } =
        services.sandbox.decide(&EffectRequest::Terminal { command })
    {
        return Err(ToolFailure::denied(reason));
    }

    let cwd = match str_arg(args, "cwd") {
        Some(raw) => services.sandbox.resolve_path(raw).map_err(ToolFailure::denied)?,
        None => services.sandbox.allowed_root().to_path_buf(),
    };

    let captured = run_command(command, &cwd)?;
    services
        .journal
        .record_terminal_command(&ctx.run_id, command, &captured.stdout)
        .map_err(|err| ToolFailure::exec(err.to_string()))?;

    if captured.exit_code != 0 {
        return Err(ToolFailure::exec(format!(
            "command exited with code {}: {}",
            captured.exit_code,
            captured.stderr.trim()
        )));
    }
    Ok(json!({
        "command": command,
        "stdout": captured.stdout,
        "stderr": captured.stderr,
        "exit_code": captured.exit_code,
    }))
}

struct Captured {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

fn run_command(command: &str, cwd: &std::path::Path) -> Result<Captured, ToolFailure> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ToolFailure::exec(format!("spawn `{command}` failed: {err}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolFailure::exec("missing stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolFailure::exec("missing stderr pipe"))?;

    let stdout_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(stdout);
        let _ = reader.read_to_string(&mut buf);
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_string(&mut buf);
        buf
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > COMMAND_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(ToolFailure::exec(format!(
                        "command `{command}` timed out after {}s",
                        COMMAND_TIMEOUT.as_secs()
                    )));
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(ToolFailure::exec(format!("wait `{command}` failed: {err}"))),
        }
    };

    Ok(Captured {
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
        exit_code: status.code().unwrap_or(-1),
    })
}
