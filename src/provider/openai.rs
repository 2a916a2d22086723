use super::http::{post_json, DEFAULT_HTTP_TIMEOUT};
use super::{
    env_credential, env_model_override, ChatMessage, ChatRequest, ChatResponse, FinishReason,
    Provider, ProviderError, Role, TokenUsage, ToolCallRequest,
};
use crate::config::ProviderSettings;
use serde_json::{json, Value};

pub const PROVIDER_NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Chat-completions dialect: tool results are a first-class `tool` role
/// and assistant tool intents ride in `tool_calls` with JSON-string
/// arguments.
pub struct OpenAiProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    enabled: bool,
}

impl OpenAiProvider {
    pub fn from_env(settings: Option<&ProviderSettings>) -> Self {
        Self {
            api_key: env_credential("OPENAI_API_KEY"),
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_model_override("OPENAI_MODEL")
                .or_else(|| settings.and_then(|s| s.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            enabled: settings.map(|s| s.enabled).unwrap_or(true),
        }
    }

    pub fn build_payload(&self, request: &ChatRequest, model: &str) -> Value {
        let messages = request
            .messages
            .iter()
            .map(|message| match message.role {
                Role::System => json!({"role": "system", "content": message.content}),
                Role::User => json!({"role": "user", "content": message.content}),
                Role::Assistant => {
                    let mut turn = json!({"role": "assistant", "content": message.content});
                    if !message.tool_calls.is_empty() {
                        let calls = message
                            .tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments,
                                    },
                                })
                            })
                            .collect::<Vec<_>>();
                        turn["tool_calls"] = Value::Array(calls);
                    }
                    turn
                }
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                }),
            })
            .collect::<Vec<_>>();

        let mut payload = json!({
            "model": model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.schema,
                        },
                    })
                })
                .collect::<Vec<_>>();
            payload["tools"] = Value::Array(tools);
        }
        payload
    }

    pub fn parse_response(&self, value: &Value) -> Result<ChatResponse, ProviderError> {
        let choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER_NAME.to_string(),
                reason: "response carries no choices".to_string(),
            })?;
        let message = choice.get("message").ok_or_else(|| ProviderError::Parse {
            provider: PROVIDER_NAME.to_string(),
            reason: "choice carries no message".to_string(),
        })?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|call| ToolCallRequest {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}")
                    .to_string(),
            })
            .collect::<Vec<_>>();

        let finish = match choice.get("finish_reason").and_then(Value::as_str) {
            Some("stop") => FinishReason::Stop,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Error,
        };
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
            message: ChatMessage {
                role: Role::Assistant,
                content,
                tool_calls,
                tool_call_id: None,
                name: None,
            },
            usage,
            finish,
        })
    }
}

impl Provider for OpenAiProvider {
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
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let headers = [("Authorization", format!("Bearer {api_key}"))];
        let response = post_json(PROVIDER_NAME, &url, &headers, &payload, DEFAULT_HTTP_TIMEOUT)?;
        self.parse_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider {
            api_key: Some("key".to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn tool_turns_use_the_tool_role() {
        let request = ChatRequest::new(vec![ChatMessage::tool_result(
            "call_7",
            "terminal",
            "done",
        )]);
        let payload = provider().build_payload(&request, DEFAULT_MODEL);
        assert_eq!(payload["messages"][0]["role"], json!("tool"));
        assert_eq!(payload["messages"][0]["tool_call_id"], json!("call_7"));
    }

    #[test]
    fn assistant_tool_calls_round_trip() {
        let response = provider()
            .parse_response(&json!({
                "model": "gpt-4o",
                "choices": [{
                    "finish_reason": "tool_calls",
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "filesystem", "arguments": "{\"operation\":\"list\"}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 9}
            }))
            .expect("parse");
        assert_eq!(response.finish, FinishReason::ToolCalls);
        assert_eq!(response.message.tool_calls[0].id, "call_1");
        assert_eq!(
            response.message.tool_calls[0].arguments,
            "{\"operation\":\"list\"}"
        );
    }
}
