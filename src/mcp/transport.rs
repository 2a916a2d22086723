use super::McpError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Newline-delimited JSON-RPC over a child process's stdio. A reader
/// thread hands stdout lines back over a channel so requests can wait
/// with a deadline instead of blocking on a pipe read.
pub struct LineTransport {
    server: String,
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<String>,
    next_id: u64,
}

impl LineTransport {
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut builder = Command::new(command);
        builder
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in env {
            builder.env(key, value);
        }

        let mut child = builder.spawn().map_err(|err| McpError::Spawn {
            server: server.to_string(),
            reason: err.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            reason: "missing stdin pipe".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            reason: "missing stdout pipe".to_string(),
        })?;

        let (sender, lines) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            server: server.to_string(),
            child,
            stdin,
            lines,
            next_id: 0,
        })
    }

    /// Sends one framed request and waits for the response carrying the
    /// same id. Unrelated frames (notifications, stale responses) are
    /// skipped.
    pub fn request(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{frame}").map_err(|err| self.io_error(err))?;
        self.stdin.flush().map_err(|err| self.io_error(err))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| self.timeout_error(timeout))?;
            let line = self
                .lines
                .recv_timeout(remaining)
                .map_err(|_| self.timeout_error(timeout))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                return Err(McpError::Protocol {
                    server: self.server.clone(),
                    reason: error.to_string(),
                });
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Closes stdin so a well-behaved server exits, then reaps it. A
    /// server still alive after the grace period is killed.
    pub fn close(mut self) {
        drop(self.stdin);
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20));
                }
                _ => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return;
                }
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> McpError {
        McpError::Io {
            server: self.server.clone(),
            source,
        }
    }

    fn timeout_error(&self, timeout: Duration) -> McpError {
        McpError::Timeout {
            server: self.server.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}
