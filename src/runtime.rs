use crate::agent::{AgentLoop, AgentOptions, AgentResult};
use crate::audit::{AuditError, AuditSink};
use crate::config::{ConfigError, Settings};
use crate::context::RunContext;
use crate::journal::Journal;
use crate::mcp::McpHost;
use crate::plan::{PlanError, PlanReport, PlanRunner, PlanStep};
use crate::provider::{
    AnthropicProvider, ChatMessage, ChatRequest, ChatResponse, GeminiProvider, OpenAiProvider,
    PerplexityProvider, Provider,
};
use crate::router::{Router, RouterError, TaskType};
use crate::sandbox::{SandboxError, SandboxPolicy};
use crate::tools::{SearchDelegate, ToolRegistry, ToolServices};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("plan generation failed: {0}")]
    PlanGeneration(String),
}

/// Explicitly assembled services: audit sink, journal, sandbox, router,
/// dispatcher and MCP host, wired once and threaded as dependencies.
/// Construct with `bootstrap`, release with `shutdown`.
pub struct Runtime {
    settings: Settings,
    audit: Arc<AuditSink>,
    journal: Arc<Journal>,
    sandbox: Arc<SandboxPolicy>,
    router: Arc<Router>,
    tools: Arc<ToolRegistry>,
    mcp: Option<Arc<McpHost>>,
}

impl Runtime {
    pub fn bootstrap(mut settings: Settings) -> Result<Self, RuntimeError> {
        settings.apply_env_overrides();
        settings.validate()?;

        let audit = Arc::new(AuditSink::open(
            &settings.stream_log_path(),
            &settings.audit_db_path(),
        )?);
        let sandbox = Arc::new(SandboxPolicy::new(
            &settings.sandbox.allowed_root,
            &settings.sandbox.terminal_whitelist,
        )?);
        let journal = Arc::new(Journal::new(
            &settings.journal_dir(),
            &settings.backups_dir(),
        ));

        let providers: Vec<Box<dyn Provider>> = vec![
            Box::new(AnthropicProvider::from_env(
                settings.providers.get("anthropic"),
            )),
            Box::new(OpenAiProvider::from_env(settings.providers.get("openai"))),
            Box::new(PerplexityProvider::from_env(
                settings.providers.get("perplexity"),
            )),
            Box::new(GeminiProvider::from_env(settings.providers.get("gemini"))),
        ];
        let router = Arc::new(Router::new(
            providers,
            settings.routing_rules.clone(),
            settings.default_provider.clone(),
            audit.clone(),
        ));

        let services = Arc::new(ToolServices {
            sandbox: sandbox.clone(),
            journal: journal.clone(),
            audit: audit.clone(),
            memo_path: settings.memo_path(),
            search: Some(Arc::new(RouterSearch {
                router: router.clone(),
            })),
            gui: None,
        });
        let mut registry = ToolRegistry::with_builtins(services);

        let mcp = if settings.mcp_servers.is_empty() {
            None
        } else {
            let host = Arc::new(McpHost::connect(&settings.mcp_servers, &audit));
            registry.attach_mcp(host.clone());
            Some(host)
        };

        Ok(Self {
            settings,
            audit,
            journal,
            sandbox,
            router,
            tools: Arc::new(registry),
            mcp,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn audit(&self) -> &Arc<AuditSink> {
        &self.audit
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn new_run_context(&self) -> RunContext {
        RunContext::minted()
    }

    /// Drives the agent loop for one objective under fresh run identity.
    pub fn run_objective(&self, objective: &str, options: Option<AgentOptions>) -> AgentResult {
        let ctx = self.new_run_context();
        self.run_objective_in(&ctx, objective, options)
    }

    pub fn run_objective_in(
        &self,
        ctx: &RunContext,
        objective: &str,
        options: Option<AgentOptions>,
    ) -> AgentResult {
        let options =
            options.unwrap_or_else(|| AgentOptions::from_budgets(self.settings.agent));
        let agent = AgentLoop::new(self.router.clone(), self.tools.clone(), self.audit.clone());
        agent.run(ctx, objective, &options)
    }

    /// Single completion over caller-managed history, for interactive
    /// turn-by-turn use. The tool catalog is offered; dispatching any
    /// returned calls is the caller's business.
    pub fn chat(
        &self,
        ctx: &RunContext,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatResponse, RouterError> {
        let mut request = ChatRequest::new(messages);
        request.tools = self.tools.definitions();
        request.temperature = self.settings.agent.temperature;
        request.max_tokens = self.settings.agent.max_tokens;
        self.router.complete(&request, ctx, None)
    }

    /// Asks the planning-routed model for a structured step list.
    pub fn generate_plan(
        &self,
        ctx: &RunContext,
        objective: &str,
    ) -> Result<Vec<PlanStep>, RuntimeError> {
        let prompt = format!(
            "Produce a JSON array of plan steps for this objective. Each step is an object \
             with: \"id\" (unique string), \"kind\" (one of filesystem, terminal, editor, \
             verify, policy, audit, custom), \"params\" (object), optional \"deps\" (array \
             of step ids), optional \"retry\" ({{\"attempts\", \"base_delay_ms\", \
             \"factor\", \"jitter\"}}), optional \"fallback_params\" (object). Respond with \
             ONLY the JSON array.\n\nObjective: {objective}"
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);
        let response = self
            .router
            .complete_for_task(&request, ctx, TaskType::Planning)?;
        let raw = extract_json_array(&response.message.content).ok_or_else(|| {
            RuntimeError::PlanGeneration(format!(
                "no JSON array found in planner output: {}",
                response.message.content
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| RuntimeError::PlanGeneration(format!("plan decode failed: {err}")))
    }

    /// Deterministic plan execution through the shared dispatcher.
    pub fn run_steps(&self, ctx: &RunContext, steps: &[PlanStep]) -> Result<PlanReport, PlanError> {
        let runner = PlanRunner::new(
            self.tools.clone(),
            self.sandbox.clone(),
            self.audit.clone(),
        );
        runner.run(ctx, steps)
    }

    /// Closes MCP transports. Audit and journal state is plain files and
    /// sqlite; dropping the runtime releases them.
    pub fn shutdown(self) {
        if let Some(mcp) = &self.mcp {
            mcp.shutdown();
        }
    }
}

struct RouterSearch {
    router: Arc<Router>,
}

impl SearchDelegate for RouterSearch {
    fn search(&self, ctx: &RunContext, query: &str, kind: &str) -> Result<String, String> {
        let request = ChatRequest::new(vec![ChatMessage::user(format!(
            "Search {kind} sources and answer concisely: {query}"
        ))]);
        self.router
            .complete_for_task(&request, ctx, TaskType::Search)
            .map(|response| response.message.content)
            .map_err(|err| err.to_string())
    }
}

fn extract_json_array(content: &str) -> Option<String> {
    let start = content.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::extract_json_array;

    #[test]
    fn arrays_are_extracted_from_surrounding_prose() {
        let content = "Here is the plan:\n[{\"id\": \"s1\", \"kind\": \"audit\"}]\nDone.";
        assert_eq!(
            extract_json_array(content).as_deref(),
            Some("[{\"id\": \"s1\", \"kind\": \"audit\"}]")
        );
        assert!(extract_json_array("no array here").is_none());
    }
}
