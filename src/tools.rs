use crate::audit::{event, AuditEvent, AuditSink, Severity};
use crate::context::RunContext;
use crate::journal::Journal;
use crate::mcp::McpHost;
use crate::provider::ToolDefinition;
use crate::sandbox::SandboxPolicy;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod comms;
pub mod computer;
pub mod editor;
pub mod filesystem;
pub mod journal_ops;
pub mod memory;
pub mod schema;
pub mod search;
pub mod support;
pub mod terminal;

pub use computer::GuiDelegate;
pub use search::SearchDelegate;

/// Failure classification carried alongside the error string so the plan
/// runner can tell denials from transient execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Denied,
    Validation,
    Exec,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Denied => "DENIED",
            Self::Validation => "VALIDATION_FAIL",
            Self::Exec => "EXEC_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn denied(reason: &str) -> Self {
        Self {
            kind: FailureKind::Denied,
            message: format!("Denied: {reason}"),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            message: message.into(),
        }
    }

    pub fn exec(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Exec,
            message: message.into(),
        }
    }
}

/// Dispatcher result: `{success, output?, error?}` plus the failure kind
/// for internal classification. The kind never reaches the model.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub kind: Option<FailureKind>,
}

impl ExecutionOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            kind: None,
        }
    }

    pub fn fail(failure: ToolFailure) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(failure.message),
            kind: Some(failure.kind),
        }
    }

    /// Serialization handed back to the model as the tool turn content.
    pub fn to_message_json(&self) -> String {
        match (&self.output, &self.error) {
            (Some(output), _) if self.success => {
                json!({"success": true, "output": output}).to_string()
            }
            (_, Some(error)) => json!({"success": false, "error": error}).to_string(),
            _ => json!({"success": self.success}).to_string(),
        }
    }
}

/// Shared effectors handed to every tool handler. Threaded explicitly so
/// tests can build isolated copies; nothing in here is process-global.
pub struct ToolServices {
    pub sandbox: Arc<SandboxPolicy>,
    pub journal: Arc<Journal>,
    pub audit: Arc<AuditSink>,
    pub memo_path: PathBuf,
    pub search: Option<Arc<dyn SearchDelegate>>,
    pub gui: Option<Arc<dyn GuiDelegate>>,
}

type Handler =
    Box<dyn Fn(&ToolServices, &RunContext, &Map<String, Value>) -> Result<Value, ToolFailure> + Send + Sync>;

pub struct RegisteredTool {
    pub definition: ToolDefinition,
    handler: Handler,
}

/// Named tools with declared argument schemas. `execute` is the single
/// dispatch path: validation, policy gating and journaling all happen in
/// the handlers it routes to, and every call is audited.
pub struct ToolRegistry {
    services: Arc<ToolServices>,
    tools: BTreeMap<String, RegisteredTool>,
    mcp: Option<Arc<McpHost>>,
}

impl ToolRegistry {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self {
            services,
            tools: BTreeMap::new(),
            mcp: None,
        }
    }

    pub fn with_builtins(services: Arc<ToolServices>) -> Self {
        let mut registry = Self::new(services);
        filesystem::register(&mut registry);
        terminal::register(&mut registry);
        editor::register(&mut registry);
        search::register(&mut registry);
        memory::register(&mut registry);
        support::register(&mut registry);
        comms::register(&mut registry);
        computer::register(&mut registry);
        journal_ops::register(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&ToolServices, &RunContext, &Map<String, Value>) -> Result<Value, ToolFailure>
            + Send
            + Sync
            + 'static,
    {
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: Box::new(handler),
            },
        );
    }

    pub fn attach_mcp(&mut self, host: Arc<McpHost>) {
        self.mcp = Some(host);
    }

    /// Tool catalog offered to the model: built-ins plus any namespaced
    /// MCP tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self
            .tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect::<Vec<_>>();
        if let Some(mcp) = &self.mcp {
            definitions.extend(mcp.tool_definitions());
        }
        definitions
    }

    pub fn execute(&self, ctx: &RunContext, name: &str, args: &Value) -> ExecutionOutcome {
        self.audit_event(
            ctx,
            event::TOOL_EXEC_START,
            Severity::Info,
            format!("executing tool `{name}`"),
            json!({"tool": name, "args": args}),
        );

        if ctx.is_cancelled() {
            let outcome = ExecutionOutcome::fail(ToolFailure::exec("run cancelled"));
            self.audit_failure(ctx, name, &outcome);
            return outcome;
        }

        let Some(tool) = self.tools.get(name) else {
            return self.execute_fallthrough(ctx, name, args);
        };

        let Some(arg_map) = args.as_object() else {
            let outcome = ExecutionOutcome::fail(ToolFailure::validation(
                "tool arguments must be a JSON object",
            ));
            self.audit_failure(ctx, name, &outcome);
            return outcome;
        };
        if let Err(detail) = schema::validate_args(&tool.definition.schema, arg_map) {
            let outcome = ExecutionOutcome::fail(ToolFailure::validation(detail));
            self.audit_failure(ctx, name, &outcome);
            return outcome;
        }

        match (tool.handler)(&self.services, ctx, arg_map) {
            Ok(output) => {
                self.audit_event(
                    ctx,
                    event::TOOL_EXEC_END,
                    Severity::Info,
                    format!("tool `{name}` succeeded"),
                    json!({"tool": name}),
                );
                ExecutionOutcome::ok(output)
            }
            Err(failure) => {
                let outcome = ExecutionOutcome::fail(failure);
                self.audit_failure(ctx, name, &outcome);
                outcome
            }
        }
    }

    /// Unknown names fall through to the MCP host before failing. MCP
    /// calls that target a filesystem path pass the same sandbox decision
    /// as built-in tools.
    fn execute_fallthrough(&self, ctx: &RunContext, name: &str, args: &Value) -> ExecutionOutcome {
        let Some(mcp) = self.mcp.as_ref().filter(|mcp| mcp.owns_tool(name)) else {
            let outcome =
                ExecutionOutcome::fail(ToolFailure::exec(format!("unknown tool `{name}`")));
            self.audit_failure(ctx, name, &outcome);
            return outcome;
        };

        if let Some(path) = args.get("path").and_then(Value::as_str) {
            if let Err(reason) = self.services.sandbox.resolve_path(path) {
                let outcome = ExecutionOutcome::fail(ToolFailure::denied(reason));
                self.audit_failure(ctx, name, &outcome);
                return outcome;
            }
        }

        match mcp.call_tool(name, args) {
            Ok(output) => {
                self.audit_event(
                    ctx,
                    event::TOOL_EXEC_END,
                    Severity::Info,
                    format!("tool `{name}` succeeded"),
                    json!({"tool": name, "proxied": true}),
                );
                ExecutionOutcome::ok(output)
            }
            Err(err) => {
                let outcome = ExecutionOutcome::fail(ToolFailure::exec(err.to_string()));
                self.audit_failure(ctx, name, &outcome);
                outcome
            }
        }
    }

    fn audit_failure(&self, ctx: &RunContext, name: &str, outcome: &ExecutionOutcome) {
        self.audit_event(
            ctx,
            event::TOOL_EXEC_ERROR,
            Severity::Warn,
            format!(
                "tool `{name}` failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            json!({
                "tool": name,
                "kind": outcome.kind.map(FailureKind::as_str),
                "error": outcome.error,
            }),
        );
    }

    fn audit_event(
        &self,
        ctx: &RunContext,
        event_type: &str,
        severity: Severity,
        message: String,
        data: Value,
    ) {
        let _ = self.services.audit.record(
            &AuditEvent::new(&ctx.run_id, event_type, message)
                .with_severity(severity)
                .with_data(data),
        );
    }
}

pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub(crate) fn required_str<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ToolFailure> {
    str_arg(args, name)
        .ok_or_else(|| ToolFailure::validation(format!("missing required argument `{name}`")))
}
