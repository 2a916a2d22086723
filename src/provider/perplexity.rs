use super::http::{post_json, DEFAULT_HTTP_TIMEOUT};
use super::{
    env_credential, env_model_override, ChatMessage, ChatRequest, ChatResponse, FinishReason,
    Provider, ProviderError, Role, TokenUsage, ToolCallRequest,
};
use crate::config::ProviderSettings;
use serde_json::{json, Value};

pub const PROVIDER_NAME: &str = "perplexity";
const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "sonar-pro";

const ENVELOPE_INSTRUCTION: &str = "When you need to use a tool, respond with ONLY a JSON \
object of the form {\"tool\": \"<tool name>\", \"arguments\": {...}} and nothing else. \
Available tools:";

/// Search-optimized chat dialect without native tool calls. When tools
/// are present the adapter instructs the model to emit a strict JSON
/// envelope and parses it back into a neutral tool call; a reply without
/// an envelope stays a plain assistant turn.
pub struct PerplexityProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    enabled: bool,
}

impl PerplexityProvider {
    pub fn from_env(settings: Option<&ProviderSettings>) -> Self {
        Self {
            api_key: env_credential("PERPLEXITY_API_KEY"),
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_model_override("PERPLEXITY_MODEL")
                .or_else(|| settings.and_then(|s| s.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            enabled: settings.map(|s| s.enabled).unwrap_or(true),
        }
    }

    pub fn build_payload(&self, request: &ChatRequest, model: &str) -> Value {
        let mut messages = Vec::new();
        if !request.tools.is_empty() {
            let catalog = request
                .tools
                .iter()
                .map(|tool| format!("- {}: {}", tool.name, tool.description))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(json!({
                "role": "system",
                "content": format!("{ENVELOPE_INSTRUCTION}\n{catalog}"),
            }));
        }
        for message in &request.messages {
            match message.role {
                Role::System => {
                    messages.push(json!({"role": "system", "content": message.content}))
                }
                Role::User => messages.push(json!({"role": "user", "content": message.content})),
                Role::Assistant => {
                    // Re-encode earlier envelope turns so the dialect sees
                    // its own convention in history.
                    let content = if message.tool_calls.is_empty() {
                        message.content.clone()
                    } else {
                        let call = &message.tool_calls[0];
                        let arguments: Value = serde_json::from_str(&call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        json!({"tool": call.name, "arguments": arguments}).to_string()
                    };
                    messages.push(json!({"role": "assistant", "content": content}));
                }
                Role::Tool => messages.push(json!({
                    "role": "user",
                    "content": format!(
                        "Tool result for {}: {}",
                        message.name.clone().unwrap_or_default(),
                        message.content
                    ),
                })),
            }
        }
        json!({
            "model": model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": messages,
        })
    }

    pub fn parse_response(
        &self,
        value: &Value,
        tools_offered: bool,
    ) -> Result<ChatResponse, ProviderError> {
        let choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER_NAME.to_string(),
                reason: "response carries no choices".to_string(),
            })?;
        let content = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut message = ChatMessage {
            role: Role::Assistant,
            content: content.clone(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        };
        let mut finish = match choice.get("finish_reason").and_then(Value::as_str) {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        if tools_offered {
            if let Some(call) = parse_envelope(&content) {
                message.content = String::new();
                message.tool_calls = vec![call];
                finish = FinishReason::ToolCalls;
            }
        }

        let usage = value.get("usage").map(|usage| TokenUsage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: PROVIDER_NAME.to_string(),
            model: value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_string(),
            message,
            usage,
            finish,
        })
    }
}

/// Accepts either a bare envelope or one embedded in surrounding prose;
/// anything that does not decode to `{"tool": …}` is treated as plain
/// text.
fn parse_envelope(content: &str) -> Option<ToolCallRequest> {
    let candidate = extract_json_object(content)?;
    let value: Value = serde_json::from_str(&candidate).ok()?;
    let name = value.get("tool").and_then(Value::as_str)?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}))
        .to_string();
    Some(ToolCallRequest {
        id: format!("call-{name}"),
        name,
        arguments,
    })
}

fn extract_json_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
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
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
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

impl Provider for PerplexityProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn available(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }

    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: PROVIDER_NAME.to_string(),
            })?;
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let payload = self.build_payload(request, &model);
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let headers = [("Authorization", format!("Bearer {api_key}"))];
        let response = post_json(PROVIDER_NAME, &url, &headers, &payload, DEFAULT_HTTP_TIMEOUT)?;
        self.parse_response(&response, !request.tools.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> PerplexityProvider {
        PerplexityProvider {
            api_key: Some("key".to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            enabled: true,
        }
    }

    fn chat_body(content: &str) -> Value {
        json!({
            "model": "sonar-pro",
            "choices": [{"finish_reason": "stop", "message": {"content": content}}],
        })
    }

    #[test]
    fn envelope_replies_become_tool_calls() {
        let response = provider()
            .parse_response(
                &chat_body("{\"tool\": \"search\", \"arguments\": {\"query\": \"rust\"}}"),
                true,
            )
            .expect("parse");
        assert_eq!(response.finish, FinishReason::ToolCalls);
        assert_eq!(response.message.tool_calls[0].name, "search");
    }

    #[test]
    fn embedded_envelopes_are_extracted() {
        let response = provider()
            .parse_response(
                &chat_body("Sure, calling now: {\"tool\": \"think\", \"arguments\": {}} done"),
                true,
            )
            .expect("parse");
        assert_eq!(response.message.tool_calls[0].name, "think");
    }

    #[test]
    fn prose_without_envelope_stays_plain() {
        let response = provider()
            .parse_response(&chat_body("No tools needed here."), true)
            .expect("parse");
        assert!(response.message.tool_calls.is_empty());
        assert_eq!(response.finish, FinishReason::Stop);
        assert_eq!(response.message.content, "No tools needed here.");
    }

    #[test]
    fn envelope_parse_ignored_when_no_tools_offered() {
        let response = provider()
            .parse_response(&chat_body("{\"tool\": \"x\"}"), false)
            .expect("parse");
        assert!(response.message.tool_calls.is_empty());
    }
}
