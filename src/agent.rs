use crate::audit::{event, AuditEvent, AuditSink, Severity};
use crate::config::AgentBudgets;
use crate::context::RunContext;
use crate::provider::{ChatMessage, ChatRequest, FinishReason};
use crate::router::Router;
use crate::tools::ToolRegistry;
use serde_json::json;
use std::sync::Arc;

/// Literal assistant phrases that terminate the loop. Matched
/// case-insensitively, and only on a tool-free turn whose finish reason
/// is `stop`.
pub const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "objective complete",
    "successfully completed",
    "all done",
    "finished",
    "completed successfully",
    "mission accomplished",
];

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous assistant operating a set of \
tools. Work toward the stated objective step by step, using tools for every side effect. \
When the objective is fully achieved, say so with the phrase \"task complete\" and \
summarize what was done.";

const NUDGE_PROMPT: &str = "If the objective is complete, reply with a final summary \
including the phrase \"task complete\". Otherwise continue working toward it with the \
available tools.";

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_iterations: u32,
    pub max_tool_calls: u32,
    pub system_prompt: Option<String>,
    pub force_provider: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from_budgets(AgentBudgets::default())
    }
}

impl AgentOptions {
    pub fn from_budgets(budgets: AgentBudgets) -> Self {
        Self {
            max_iterations: budgets.max_iterations,
            max_tool_calls: budgets.max_tool_calls,
            system_prompt: None,
            force_provider: None,
            temperature: budgets.temperature,
            max_tokens: budgets.max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub final_response: String,
    pub iterations: u32,
    pub tool_calls: u32,
    pub errors: Vec<String>,
    /// The full conversation, for callers that want the context back.
    pub messages: Vec<ChatMessage>,
}

/// The LM ↔ tool cycle. The loop owns no services; it borrows the
/// router and dispatcher it is constructed with, and nothing holds a
/// reference back to it.
pub struct AgentLoop {
    router: Arc<Router>,
    tools: Arc<ToolRegistry>,
    audit: Arc<AuditSink>,
}

impl AgentLoop {
    pub fn new(router: Arc<Router>, tools: Arc<ToolRegistry>, audit: Arc<AuditSink>) -> Self {
        Self {
            router,
            tools,
            audit,
        }
    }

    pub fn run(&self, ctx: &RunContext, objective: &str, options: &AgentOptions) -> AgentResult {
        self.record(
            ctx,
            event::AGENT_START,
            Severity::Info,
            format!("objective: {objective}"),
            json!({
                "max_iterations": options.max_iterations,
                "max_tool_calls": options.max_tool_calls,
            }),
        );

        let system_prompt = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(objective),
        ];
        let tool_definitions = self.tools.definitions();

        let mut iterations = 0u32;
        let mut tool_calls = 0u32;
        let mut errors: Vec<String> = Vec::new();
        let mut final_response = String::new();
        let mut free_pass_used = false;
        let mut budget_noted = false;

        loop {
            if iterations >= options.max_iterations {
                errors.push(format!(
                    "maximum iterations ({}) reached without completion",
                    options.max_iterations
                ));
                self.record(
                    ctx,
                    event::AGENT_ERROR,
                    Severity::Warn,
                    "iteration budget exhausted",
                    json!({"iterations": iterations}),
                );
                break;
            }
            if ctx.is_cancelled() {
                errors.push("run cancelled".to_string());
                self.record(
                    ctx,
                    event::AGENT_ERROR,
                    Severity::Warn,
                    "run cancelled",
                    json!({"iterations": iterations}),
                );
                break;
            }
            iterations += 1;

            let mut request = ChatRequest::new(messages.clone());
            request.tools = tool_definitions.clone();
            request.temperature = options.temperature;
            request.max_tokens = options.max_tokens;

            let response =
                match self
                    .router
                    .complete(&request, ctx, options.force_provider.as_deref())
                {
                    Ok(response) => response,
                    Err(err) => {
                        // Router errors surface only once the whole
                        // provider chain is exhausted; nothing left to
                        // react to.
                        errors.push(err.to_string());
                        self.record(
                            ctx,
                            event::AGENT_ERROR,
                            Severity::Error,
                            err.to_string(),
                            json!({"iterations": iterations}),
                        );
                        break;
                    }
                };

            messages.push(response.message.clone());
            if !response.message.content.is_empty() {
                final_response = response.message.content.clone();
            }

            if response.message.tool_calls.is_empty() {
                if response.finish == FinishReason::Stop {
                    if contains_completion_phrase(&response.message.content) {
                        self.record(
                            ctx,
                            event::AGENT_COMPLETE,
                            Severity::Info,
                            "completion phrase detected",
                            json!({"iterations": iterations, "tool_calls": tool_calls}),
                        );
                        return AgentResult {
                            success: errors.is_empty(),
                            final_response,
                            iterations,
                            tool_calls,
                            errors,
                            messages,
                        };
                    }
                    // One free pass for a plain reply, then nudge the
                    // model to either summarize or continue.
                    if free_pass_used {
                        messages.push(ChatMessage::user(NUDGE_PROMPT));
                    } else {
                        free_pass_used = true;
                    }
                    continue;
                }
                errors.push(format!(
                    "provider finished with {:?} and no tool calls",
                    response.finish
                ));
                messages.push(ChatMessage::user(format!(
                    "The previous response ended abnormally ({:?}). Please continue \
                     working toward the objective.",
                    response.finish
                )));
                continue;
            }

            for call in &response.message.tool_calls {
                if tool_calls >= options.max_tool_calls {
                    if !budget_noted {
                        errors.push(format!(
                            "tool call budget ({}) exhausted",
                            options.max_tool_calls
                        ));
                        budget_noted = true;
                    }
                    // Keep the correlation invariant: every tool call id
                    // still gets a tool turn, it just carries the budget
                    // refusal instead of output.
                    messages.push(ChatMessage::tool_result(
                        &call.id,
                        &call.name,
                        json!({"success": false, "error": "tool call budget exhausted"})
                            .to_string(),
                    ));
                    continue;
                }
                tool_calls += 1;

                let args: serde_json::Value =
                    serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                let outcome = self.tools.execute(ctx, &call.name, &args);
                if !outcome.success {
                    errors.push(format!(
                        "tool `{}`: {}",
                        call.name,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                messages.push(ChatMessage::tool_result(
                    &call.id,
                    &call.name,
                    outcome.to_message_json(),
                ));
            }
        }

        AgentResult {
            success: errors.is_empty(),
            final_response,
            iterations,
            tool_calls,
            errors,
            messages,
        }
    }

    fn record(
        &self,
        ctx: &RunContext,
        event_type: &str,
        severity: Severity,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let _ = self.audit.record(
            &AuditEvent::new(&ctx.run_id, event_type, message)
                .with_severity(severity)
                .with_data(data),
        );
    }
}

pub fn contains_completion_phrase(content: &str) -> bool {
    let lowered = content.to_ascii_lowercase();
    COMPLETION_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}
