use crate::audit::AuditError;
use crate::tools::FailureKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub mod retry;
pub mod runner;
pub mod topo;

pub use retry::RetryPolicy;
pub use runner::PlanRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Filesystem,
    Terminal,
    Editor,
    Verify,
    Policy,
    Audit,
    Custom,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Terminal => "terminal",
            Self::Editor => "editor",
            Self::Verify => "verify",
            Self::Policy => "policy",
            Self::Audit => "audit",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlanStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub fallback_params: Option<Map<String, Value>>,
}

impl PlanStep {
    pub fn new(id: &str, kind: StepKind, params: Value) -> Self {
        Self {
            id: id.to_string(),
            kind,
            params: params.as_object().cloned().unwrap_or_default(),
            deps: Vec::new(),
            retry: None,
            fallback_params: None,
        }
    }

    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|dep| dep.to_string()).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_fallback(mut self, params: Value) -> Self {
        self.fallback_params = params.as_object().cloned();
        self
    }
}

/// Failure of one step attempt, classified so the retry wrapper knows
/// what is worth repeating.
#[derive(Debug, Clone)]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
}

impl StepError {
    pub fn retryable(&self) -> bool {
        self.kind == FailureKind::Exec
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("step `{step_id}` failed: {reason}")]
    StepFailed { step_id: String, reason: String },
    #[error("plan run cancelled")]
    Cancelled,
    #[error(transparent)]
    Audit(#[from] AuditError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub run_id: String,
    pub summary: String,
    pub total_ms: u64,
    pub steps: usize,
    pub ok: usize,
    pub retries: u32,
    pub fallbacks: u32,
    pub generated_at: String,
}

impl PlanReport {
    /// Wire shape emitted via audit and handed back to the caller.
    pub fn to_json(&self) -> Value {
        json!({
            "runId": self.run_id,
            "report": {
                "summary": self.summary,
                "timings": {"totalMs": self.total_ms},
                "stats": {
                    "steps": self.steps,
                    "ok": self.ok,
                    "retries": self.retries,
                    "fallbacks": self.fallbacks,
                },
                "generatedAt": self.generated_at,
            },
        })
    }
}
