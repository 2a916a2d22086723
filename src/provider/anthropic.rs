use super::http::{post_json, DEFAULT_HTTP_TIMEOUT};
use super::{
    env_credential, env_model_override, ChatMessage, ChatRequest, ChatResponse, FinishReason,
    Provider, ProviderError, Role, TokenUsage, ToolCallRequest,
};
use crate::config::ProviderSettings;
use serde_json::{json, Value};

pub const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

/// Messages-API dialect: system prompt travels in a dedicated field,
/// assistant tool intents are `tool_use` content blocks, and tool results
/// go back as `tool_result` blocks inside a user turn.
pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    enabled: bool,
}

impl AnthropicProvider {
    pub fn from_env(settings: Option<&ProviderSettings>) -> Self {
        Self {
            api_key: env_credential("ANTHROPIC_API_KEY"),
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_model_override("ANTHROPIC_MODEL")
                .or_else(|| settings.and_then(|s| s.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            enabled: settings.map(|s| s.enabled).unwrap_or(true),
        }
    }

    pub fn build_payload(&self, request: &ChatRequest, model: &str) -> Value {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();
        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                Role::User => messages.push(json!({
                    "role": "user",
                    "content": message.content,
                })),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in &message.tool_calls {
                        let input: Value = serde_json::from_str(&call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": input,
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                        "content": message.content,
                    }],
                })),
            }
        }

        let mut payload = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if !system_parts.is_empty() {
            payload["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.schema,
                    })
                })
                .collect::<Vec<_>>();
            payload["tools"] = Value::Array(tools);
        }
        payload
    }

    pub fn parse_response(&self, value: &Value) -> Result<ChatResponse, ProviderError> {
        let model = value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in value
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(part) = block.get("text").and_then(Value::as_str) {
                        text.push_str(part);
                    }
                }
                Some("tool_use") => {
                    let arguments = block
                        .get("input")
                        .cloned()
                        .unwrap_or_else(|| json!({}))
                        .to_string();
                    tool_calls.push(ToolCallRequest {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    });
                }
                _ => {}
            }
        }

        let finish = match value.get("stop_reason").and_then(Value::as_str) {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Error,
        };
        let usage = value.get("usage").map(|usage| TokenUsage {
            input_tokens: usage
                .get("input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: PROVIDER_NAME.to_string(),
            model,
            message: ChatMessage {
                role: Role::Assistant,
                content: text,
                tool_calls,
                tool_call_id: None,
                name: None,
            },
            usage,
            finish,
        })
    }
}

impl Provider for AnthropicProvider {
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
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let headers = [
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", API_VERSION.to_string()),
        ];
        let response = post_json(PROVIDER_NAME, &url, &headers, &payload, DEFAULT_HTTP_TIMEOUT)?;
        self.parse_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider {
            api_key: Some("key".to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn system_turns_move_to_the_system_field() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
        ]);
        let payload = provider().build_payload(&request, DEFAULT_MODEL);
        assert_eq!(payload["system"], json!("be terse"));
        assert_eq!(payload["messages"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn tool_results_become_tool_result_blocks() {
        let request = ChatRequest::new(vec![ChatMessage::tool_result(
            "toolu_1",
            "filesystem",
            "{\"ok\":true}",
        )]);
        let payload = provider().build_payload(&request, DEFAULT_MODEL);
        let turn = &payload["messages"][0];
        assert_eq!(turn["role"], json!("user"));
        assert_eq!(turn["content"][0]["type"], json!("tool_result"));
        assert_eq!(turn["content"][0]["tool_use_id"], json!("toolu_1"));
    }

    #[test]
    fn tool_schemas_pass_through_unmodified() {
        let request = ChatRequest::new(vec![ChatMessage::user("go")]).with_tools(vec![
            ToolDefinition {
                name: "probe".to_string(),
                description: "probe".to_string(),
                schema: json!({"type": "object", "additionalProperties": false}),
            },
        ]);
        let payload = provider().build_payload(&request, DEFAULT_MODEL);
        assert_eq!(
            payload["tools"][0]["input_schema"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn tool_use_blocks_parse_into_neutral_calls() {
        let response = provider()
            .parse_response(&json!({
                "model": "claude-sonnet-4-5",
                "stop_reason": "tool_use",
                "content": [
                    {"type": "text", "text": "running"},
                    {"type": "tool_use", "id": "toolu_9", "name": "terminal",
                     "input": {"command": "ls"}}
                ],
                "usage": {"input_tokens": 12, "output_tokens": 5}
            }))
            .expect("parse");
        assert_eq!(response.finish, FinishReason::ToolCalls);
        assert_eq!(response.message.tool_calls.len(), 1);
        assert_eq!(response.message.tool_calls[0].name, "terminal");
        assert_eq!(response.usage.map(|u| u.input_tokens), Some(12));
    }
}
