use crate::audit::{event, AuditError, AuditEvent, AuditSink, Severity};
use crate::context::RunContext;
use crate::provider::{ChatRequest, ChatResponse, Provider, ProviderError};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub mod rules;
pub mod task_type;

pub use rules::{default_rules, RoutingRule};
pub use task_type::{detect_task_type, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no providers are available")]
    NoAvailableProviders,
    #[error("all {attempts} provider(s) failed; last error: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: ProviderError,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Audit(#[from] AuditError),
}

struct Selection {
    index: usize,
    model_override: Option<String>,
    task_type: TaskType,
    reason: String,
}

/// Task-based provider selection with a transparent fallback chain: the
/// selected provider first, then every other available provider in
/// registration order. Adapter errors are audited and skipped; only
/// exhaustion of the whole chain surfaces an error.
pub struct Router {
    providers: Vec<Box<dyn Provider>>,
    rules: Vec<RoutingRule>,
    default_provider: Option<String>,
    audit: Arc<AuditSink>,
}

impl Router {
    pub fn new(
        providers: Vec<Box<dyn Provider>>,
        user_rules: Vec<RoutingRule>,
        default_provider: Option<String>,
        audit: Arc<AuditSink>,
    ) -> Self {
        let mut rules = user_rules;
        rules.extend(default_rules());
        Self {
            providers,
            rules,
            default_provider,
            audit,
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn has_available_provider(&self) -> bool {
        self.providers.iter().any(|p| p.available())
    }

    /// Issues a completion for a specific task type regardless of what
    /// the message text suggests; used by the search tool.
    pub fn complete_for_task(
        &self,
        request: &ChatRequest,
        ctx: &RunContext,
        task_type: TaskType,
    ) -> Result<ChatResponse, RouterError> {
        let selection = self.select(request, None, Some(task_type))?;
        self.walk_chain(request, ctx, selection)
    }

    pub fn complete(
        &self,
        request: &ChatRequest,
        ctx: &RunContext,
        force_provider: Option<&str>,
    ) -> Result<ChatResponse, RouterError> {
        let selection = self.select(request, force_provider, None)?;
        self.walk_chain(request, ctx, selection)
    }

    fn select(
        &self,
        request: &ChatRequest,
        force_provider: Option<&str>,
        task_type_override: Option<TaskType>,
    ) -> Result<Selection, RouterError> {
        let last_user = request.last_user_content();
        let task_type = task_type_override
            .unwrap_or_else(|| detect_task_type(last_user, !request.tools.is_empty()));

        if let Some(forced) = force_provider {
            if let Some(index) = self.index_of_available(forced) {
                return Ok(Selection {
                    index,
                    model_override: None,
                    task_type,
                    reason: format!("provider `{forced}` forced by caller"),
                });
            }
        }

        let tool_names = request
            .tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<Vec<_>>();
        for rule in &self.rules {
            if !rule.matches(task_type, last_user, &tool_names) {
                continue;
            }
            if let Some(index) = self.index_of_available(&rule.provider) {
                return Ok(Selection {
                    index,
                    model_override: rule.model.clone(),
                    task_type,
                    reason: rule.reason.clone(),
                });
            }
        }

        if let Some(default) = &self.default_provider {
            if let Some(index) = self.index_of_available(default) {
                return Ok(Selection {
                    index,
                    model_override: None,
                    task_type,
                    reason: format!("default provider `{default}`"),
                });
            }
        }

        let index = self
            .providers
            .iter()
            .position(|provider| provider.available())
            .ok_or(RouterError::NoAvailableProviders)?;
        Ok(Selection {
            index,
            model_override: None,
            task_type,
            reason: format!(
                "first available provider `{}`",
                self.providers[index].name()
            ),
        })
    }

    fn walk_chain(
        &self,
        request: &ChatRequest,
        ctx: &RunContext,
        selection: Selection,
    ) -> Result<ChatResponse, RouterError> {
        let mut chain = vec![selection.index];
        for (index, provider) in self.providers.iter().enumerate() {
            if index != selection.index && provider.available() {
                chain.push(index);
            }
        }

        let mut effective = request.clone();
        if effective.model.is_none() {
            effective.model = selection.model_override.clone();
        }

        let attempts = chain.len();
        let mut last_error: Option<ProviderError> = None;
        for (position, index) in chain.into_iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(RouterError::Cancelled);
            }
            let provider = &self.providers[index];
            // The rule's model override only applies to the provider the
            // rule selected.
            let attempt_request = if position == 0 {
                &effective
            } else {
                request
            };

            self.audit.record(
                &AuditEvent::new(&ctx.run_id, event::AI_REQUEST, selection.reason.clone())
                    .with_data(json!({
                        "provider": provider.name(),
                        "model": attempt_request.model,
                        "task_type": selection.task_type.as_str(),
                        "messages": attempt_request.messages.len(),
                        "tools": attempt_request.tools.len(),
                        "fallback_position": position,
                    })),
            )?;

            let started = Instant::now();
            match provider.complete(attempt_request) {
                Ok(response) => {
                    self.audit.record(
                        &AuditEvent::new(
                            &ctx.run_id,
                            event::AI_RESPONSE,
                            format!("completion from `{}`", response.provider),
                        )
                        .with_data(json!({
                            "provider": response.provider,
                            "model": response.model,
                            "task_type": selection.task_type.as_str(),
                            "duration_ms": started.elapsed().as_millis() as u64,
                            "usage": response.usage,
                            "finish": response.finish,
                        })),
                    )?;
                    return Ok(response);
                }
                Err(err) => {
                    self.audit.record(
                        &AuditEvent::new(
                            &ctx.run_id,
                            event::AI_RESPONSE,
                            format!("provider `{}` failed: {err}", provider.name()),
                        )
                        .with_severity(Severity::Warn)
                        .with_data(json!({
                            "provider": provider.name(),
                            "duration_ms": started.elapsed().as_millis() as u64,
                            "error": err.to_string(),
                        })),
                    )?;
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(last) => RouterError::Exhausted { attempts, last },
            None => RouterError::NoAvailableProviders,
        })
    }

    fn index_of_available(&self, name: &str) -> Option<usize> {
        self.providers
            .iter()
            .position(|provider| provider.name() == name && provider.available())
    }
}
