use super::retry::{run_with_retry, RetryOutcome, RetryPolicy};
use super::topo::topological_order;
use super::{PlanError, PlanReport, PlanStep, StepError, StepKind};
use crate::audit::{event, AuditEvent, AuditSink, Severity};
use crate::context::RunContext;
use crate::sandbox::{Decision, EffectRequest, SandboxPolicy};
use crate::tools::{FailureKind, ToolRegistry};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Deterministic execution of a dependency DAG through the same
/// dispatcher, policy and audit primitives the agent loop uses. Steps
/// run in topological order with per-step retry and a one-shot fallback
/// parameter set.
pub struct PlanRunner {
    registry: Arc<ToolRegistry>,
    sandbox: Arc<SandboxPolicy>,
    audit: Arc<AuditSink>,
}

impl PlanRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sandbox: Arc<SandboxPolicy>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            registry,
            sandbox,
            audit,
        }
    }

    pub fn run(&self, ctx: &RunContext, steps: &[PlanStep]) -> Result<PlanReport, PlanError> {
        let started = Instant::now();
        let order = match topological_order(steps)? {
            Some(order) => order,
            None => {
                self.audit.record(
                    &AuditEvent::new(
                        &ctx.run_id,
                        "PLAN_CYCLE",
                        "dependency cycle detected; executing in input order",
                    )
                    .with_severity(Severity::Warn),
                )?;
                (0..steps.len()).collect()
            }
        };

        let mut retries = 0u32;
        let mut fallbacks = 0u32;
        let mut ok = 0usize;

        for index in order {
            let step = &steps[index];
            if ctx.is_cancelled() {
                return Err(PlanError::Cancelled);
            }

            self.audit.record(
                &AuditEvent::new(&ctx.run_id, event::STEP_START, format!("step `{}`", step.id))
                    .with_data(json!({"step_id": step.id, "kind": step.kind.as_str()})),
            )?;

            let policy = step.retry.unwrap_or_else(RetryPolicy::single);
            let primary = run_with_retry(&policy, || self.attempt(ctx, step, &step.params));
            retries += primary.retries;

            let result = match primary.result {
                Ok(output) => Ok(output),
                Err(primary_error) => match &step.fallback_params {
                    Some(fallback) => {
                        self.audit.record(
                            &AuditEvent::new(
                                &ctx.run_id,
                                event::FALLBACK_APPLY,
                                format!(
                                    "step `{}` falling back after: {primary_error}",
                                    step.id
                                ),
                            )
                            .with_severity(Severity::Warn)
                            .with_data(json!({"step_id": step.id})),
                        )?;
                        let secondary: RetryOutcome =
                            run_with_retry(&policy, || self.attempt(ctx, step, fallback));
                        retries += secondary.retries;
                        match secondary.result {
                            Ok(output) => {
                                fallbacks += 1;
                                Ok(output)
                            }
                            Err(err) => Err(err),
                        }
                    }
                    None => Err(primary_error),
                },
            };

            match result {
                Ok(_) => {
                    ok += 1;
                    self.audit.record(
                        &AuditEvent::new(
                            &ctx.run_id,
                            event::STEP_END,
                            format!("step `{}` succeeded", step.id),
                        )
                        .with_data(json!({"step_id": step.id})),
                    )?;
                }
                Err(err) => {
                    self.audit.record(
                        &AuditEvent::new(
                            &ctx.run_id,
                            event::STEP_FAIL,
                            format!("step `{}` failed: {err}", step.id),
                        )
                        .with_severity(Severity::Error)
                        .with_data(json!({"step_id": step.id, "kind": err.kind.as_str()})),
                    )?;
                    return Err(PlanError::StepFailed {
                        step_id: step.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let report = PlanReport {
            run_id: ctx.run_id.clone(),
            summary: format!("{ok}/{} steps succeeded", steps.len()),
            total_ms: started.elapsed().as_millis() as u64,
            steps: steps.len(),
            ok,
            retries,
            fallbacks,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        self.audit.record(
            &AuditEvent::new(&ctx.run_id, event::RUN_REPORT, report.summary.clone())
                .with_data(report.to_json()),
        )?;
        println!("{}", report.to_json());
        Ok(report)
    }

    /// One attempt of one step: pre-check, dispatch by kind,
    /// post-validate.
    fn attempt(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        params: &Map<String, Value>,
    ) -> Result<Value, StepError> {
        self.pre_check(step, params)?;
        let output = self.dispatch(ctx, step, params)?;
        post_validate(params, &output)?;
        Ok(output)
    }

    /// Denial-kind failure raised before any effectful code runs.
    fn pre_check(&self, step: &PlanStep, params: &Map<String, Value>) -> Result<(), StepError> {
        let request = match step.kind {
            StepKind::Filesystem | StepKind::Editor => params
                .get("path")
                .and_then(Value::as_str)
                .map(|path| EffectRequest::Filesystem {
                    path: Path::new(path),
                }),
            StepKind::Terminal => params
                .get("command")
                .and_then(Value::as_str)
                .map(|command| EffectRequest::Terminal { command }),
            _ => None,
        };
        if let Some(request) = request {
            if let Decision::Deny { reason } = self.sandbox.decide(&request) {
                return Err(StepError {
                    kind: FailureKind::Denied,
                    message: format!("Denied: {reason}"),
                });
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        params: &Map<String, Value>,
    ) -> Result<Value, StepError> {
        match step.kind {
            StepKind::Filesystem => self.dispatch_tool(ctx, "filesystem", params),
            StepKind::Terminal => self.dispatch_tool(ctx, "terminal", params),
            StepKind::Editor => self.dispatch_tool(ctx, "editor", params),
            StepKind::Verify => verify(&self.sandbox, params),
            StepKind::Policy => Ok(self.policy_probe(params)),
            StepKind::Audit => self.audit_note(ctx, params),
            StepKind::Custom => {
                let tool = params
                    .get("tool")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StepError {
                        kind: FailureKind::Validation,
                        message: "custom step requires a `tool` parameter".to_string(),
                    })?;
                let args = params
                    .get("args")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                self.dispatch_value(ctx, tool, &args)
            }
        }
    }

    fn dispatch_tool(
        &self,
        ctx: &RunContext,
        tool: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, StepError> {
        let mut args = params.clone();
        args.remove("expect_contains");
        self.dispatch_value(ctx, tool, &Value::Object(args))
    }

    fn dispatch_value(
        &self,
        ctx: &RunContext,
        tool: &str,
        args: &Value,
    ) -> Result<Value, StepError> {
        let outcome = self.registry.execute(ctx, tool, args);
        if outcome.success {
            Ok(outcome.output.unwrap_or(Value::Null))
        } else {
            Err(StepError {
                kind: outcome.kind.unwrap_or(FailureKind::Exec),
                message: outcome
                    .error
                    .unwrap_or_else(|| "tool execution failed".to_string()),
            })
        }
    }

    fn policy_probe(&self, params: &Map<String, Value>) -> Value {
        let decision = if let Some(path) = params.get("path").and_then(Value::as_str) {
            self.sandbox.decide(&EffectRequest::Filesystem {
                path: Path::new(path),
            })
        } else if let Some(command) = params.get("command").and_then(Value::as_str) {
            self.sandbox.decide(&EffectRequest::Terminal { command })
        } else {
            Decision::Allow
        };
        match decision {
            Decision::Allow => json!({"decision": "allow"}),
            Decision::Deny { reason } => json!({"decision": "deny", "reason": reason}),
        }
    }

    fn audit_note(
        &self,
        ctx: &RunContext,
        params: &Map<String, Value>,
    ) -> Result<Value, StepError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("plan audit note");
        let event_type = params
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("PLAN_NOTE");
        self.audit
            .record(&AuditEvent::new(&ctx.run_id, event_type, message))
            .map_err(|err| StepError {
                kind: FailureKind::Exec,
                message: err.to_string(),
            })?;
        Ok(json!({"recorded": true}))
    }
}

/// Semantic check over the dispatch output: a step may require a
/// sentinel string in its captured stdout or content.
fn post_validate(params: &Map<String, Value>, output: &Value) -> Result<(), StepError> {
    let Some(sentinel) = params.get("expect_contains").and_then(Value::as_str) else {
        return Ok(());
    };
    let haystack = output
        .get("stdout")
        .or_else(|| output.get("content"))
        .or_else(|| output.get("result"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if haystack.contains(sentinel) {
        Ok(())
    } else {
        Err(StepError {
            kind: FailureKind::Validation,
            message: format!("output does not contain expected sentinel `{sentinel}`"),
        })
    }
}

/// Local filesystem assertions for verify steps.
fn verify(sandbox: &SandboxPolicy, params: &Map<String, Value>) -> Result<Value, StepError> {
    let Some(raw_path) = params.get("path").and_then(Value::as_str) else {
        return Err(StepError {
            kind: FailureKind::Validation,
            message: "verify step requires a `path` parameter".to_string(),
        });
    };
    let path = sandbox.resolve_path(raw_path).map_err(|reason| StepError {
        kind: FailureKind::Denied,
        message: format!("Denied: {reason}"),
    })?;
    if !path.exists() {
        return Err(StepError {
            kind: FailureKind::Validation,
            message: format!("expected path `{}` to exist", path.display()),
        });
    }
    if let Some(needle) = params.get("contains").and_then(Value::as_str) {
        let content = std::fs::read_to_string(&path).map_err(|err| StepError {
            kind: FailureKind::Exec,
            message: format!("read {} failed: {err}", path.display()),
        })?;
        if !content.contains(needle) {
            return Err(StepError {
                kind: FailureKind::Validation,
                message: format!("`{}` does not contain `{needle}`", path.display()),
            });
        }
    }
    Ok(json!({"verified": true, "path": path.display().to_string()}))
}
