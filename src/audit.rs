use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub mod store;

pub use store::{AuditStore, StoredEvent};

/// Audit event vocabulary. Unknown strings are accepted as well; the
/// payload column is schema-less.
pub mod event {
    pub const AGENT_START: &str = "AGENT_START";
    pub const AGENT_COMPLETE: &str = "AGENT_COMPLETE";
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    pub const AI_REQUEST: &str = "AI_REQUEST";
    pub const AI_RESPONSE: &str = "AI_RESPONSE";
    pub const TOOL_EXEC_START: &str = "TOOL_EXEC_START";
    pub const TOOL_EXEC_END: &str = "TOOL_EXEC_END";
    pub const TOOL_EXEC_ERROR: &str = "TOOL_EXEC_ERROR";
    pub const STEP_START: &str = "STEP_START";
    pub const STEP_END: &str = "STEP_END";
    pub const STEP_FAIL: &str = "STEP_FAIL";
    pub const FALLBACK_APPLY: &str = "FALLBACK_APPLY";
    pub const RUN_REPORT: &str = "RUN_REPORT";
    pub const APPROVAL_REQUESTED: &str = "APPROVAL_REQUESTED";
    pub const NOTIFICATION_SENT: &str = "NOTIFICATION_SENT";
    pub const DOMAIN_SWITCH: &str = "DOMAIN_SWITCH";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub run_id: String,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    pub data: serde_json::Value,
}

impl AuditEvent {
    pub fn new(run_id: &str, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            event_type: event_type.to_string(),
            severity: Severity::Info,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to create audit path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append audit stream {path}: {source}")]
    Stream {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("audit store lock poisoned")]
    Poisoned,
}

/// Append-only structured event log: a stream half for human follow-along
/// and a durable sqlite half. Writes are synchronous; the store connection
/// sits behind a single writer lock and is shared by every run in the
/// process.
pub struct AuditSink {
    stream_path: PathBuf,
    store: Mutex<AuditStore>,
    echo_threshold: Severity,
}

impl AuditSink {
    pub fn open(stream_path: &Path, db_path: &Path) -> Result<Self, AuditError> {
        let store = AuditStore::open(db_path)?;
        let echo_threshold = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|raw| Severity::parse(&raw))
            .unwrap_or(Severity::Info);
        Ok(Self {
            stream_path: stream_path.to_path_buf(),
            store: Mutex::new(store),
            echo_threshold,
        })
    }

    /// Records one event in both halves and returns the store row id.
    pub fn record(&self, event: &AuditEvent) -> Result<i64, AuditError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        self.append_stream_line(event, &created_at)?;
        let store = self.store.lock().map_err(|_| AuditError::Poisoned)?;
        store.insert(event, &created_at)
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<StoredEvent>, AuditError> {
        let store = self.store.lock().map_err(|_| AuditError::Poisoned)?;
        store.events_for_run(run_id)
    }

    fn append_stream_line(&self, event: &AuditEvent, created_at: &str) -> Result<(), AuditError> {
        let line = format!(
            "ts={created_at} run_id={} event={} severity={} msg={:?} data={}",
            event.run_id,
            event.event_type,
            event.severity.as_str(),
            event.message,
            event.data,
        );
        if event.severity >= self.echo_threshold {
            eprintln!("{line}");
        }
        if let Some(parent) = self.stream_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AuditError::CreateDir {
                path: parent.display().to_string(),
                source: err,
            })?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.stream_path)
            .map_err(|err| stream_error(&self.stream_path, err))?;
        writeln!(file, "{line}").map_err(|err| stream_error(&self.stream_path, err))
    }
}

fn stream_error(path: &Path, source: std::io::Error) -> AuditError {
    AuditError::Stream {
        path: path.display().to_string(),
        source,
    }
}
