use super::http::{post_json, DEFAULT_HTTP_TIMEOUT};
use super::sanitize::sanitize_schema;
use super::{
    env_credential, env_model_override, ChatMessage, ChatRequest, ChatResponse, FinishReason,
    Provider, ProviderError, Role, TokenUsage, ToolCallRequest,
};
use crate::config::ProviderSettings;
use serde_json::{json, Value};

pub const PROVIDER_NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// generateContent dialect: roles are user/model, tool intents are
/// `functionCall` parts without ids, and results return as
/// `functionResponse` parts correlated by function name. The dialect
/// rejects several JSON-Schema keywords, so declarations pass through
/// schema hygiene first.
pub struct GeminiProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    enabled: bool,
}

impl GeminiProvider {
    pub fn from_env(settings: Option<&ProviderSettings>) -> Self {
        Self {
            api_key: env_credential("GEMINI_API_KEY"),
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_model_override("GEMINI_MODEL")
                .or_else(|| settings.and_then(|s| s.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            enabled: settings.map(|s| s.enabled).unwrap_or(true),
        }
    }

    pub fn build_payload(&self, request: &ChatRequest) -> Value {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(json!({"text": message.content})),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": message.content}],
                })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(json!({"text": message.content}));
                    }
                    for call in &message.tool_calls {
                        let args: Value = serde_json::from_str(&call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        parts.push(json!({
                            "functionCall": {"name": call.name, "args": args},
                        }));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                Role::Tool => contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": message.name.clone().unwrap_or_default(),
                            "response": {"content": message.content},
                        },
                    }],
                })),
            }
        }

        let mut payload = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if !system_parts.is_empty() {
            payload["systemInstruction"] = json!({"parts": system_parts});
        }
        if !request.tools.is_empty() {
            let declarations = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": sanitize_schema(&tool.schema),
                    })
                })
                .collect::<Vec<_>>();
            payload["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        payload
    }

    pub fn parse_response(&self, value: &Value) -> Result<ChatResponse, ProviderError> {
        let candidate = value
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER_NAME.to_string(),
                reason: "response carries no candidates".to_string(),
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (index, part) in candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .enumerate()
        {
            if let Some(fragment) = part.get("text").and_then(Value::as_str) {
                text.push_str(fragment);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = call
                    .get("args")
                    .cloned()
                    .unwrap_or_else(|| json!({}))
                    .to_string();
                // The dialect has no call ids; synthesize stable ones so
                // tool turns can still correlate.
                tool_calls.push(ToolCallRequest {
                    id: format!("call-{index}-{name}"),
                    name,
                    arguments,
                });
            }
        }

        let finish = match candidate.get("finishReason").and_then(Value::as_str) {
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => FinishReason::Error,
            _ => FinishReason::Error,
        };
        let usage = value.get("usageMetadata").map(|usage| TokenUsage {
            input_tokens: usage
                .get("promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: PROVIDER_NAME.to_string(),
            model: value
                .get("modelVersion")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_string(),
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

impl Provider for GeminiProvider {
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
        let payload = self.build_payload(request);
        let url = format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        );
        let headers = [("x-goog-api-key", api_key.to_string())];
        let response = post_json(PROVIDER_NAME, &url, &headers, &payload, DEFAULT_HTTP_TIMEOUT)?;
        self.parse_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use serde_json::json;

    fn provider() -> GeminiProvider {
        GeminiProvider {
            api_key: Some("key".to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn declarations_are_sanitized() {
        let request = ChatRequest::new(vec![ChatMessage::user("go")]).with_tools(vec![
            ToolDefinition {
                name: "probe".to_string(),
                description: "probe".to_string(),
                schema: json!({
                    "$schema": "https://json-schema.org/draft-07/schema#",
                    "additionalProperties": false,
                    "title": "X",
                    "type": "object",
                    "properties": {"n": {"type": "number"}}
                }),
            },
        ]);
        let payload = provider().build_payload(&request);
        let parameters = &payload["tools"][0]["functionDeclarations"][0]["parameters"];
        assert_eq!(
            *parameters,
            json!({"type": "object", "properties": {"n": {"type": "number"}}})
        );
    }

    #[test]
    fn function_calls_get_synthesized_ids() {
        let response = provider()
            .parse_response(&json!({
                "candidates": [{
                    "finishReason": "STOP",
                    "content": {"parts": [
                        {"functionCall": {"name": "terminal", "args": {"command": "ls"}}}
                    ]}
                }]
            }))
            .expect("parse");
        assert_eq!(response.finish, FinishReason::ToolCalls);
        assert_eq!(response.message.tool_calls[0].id, "call-0-terminal");
    }

    #[test]
    fn safety_blocks_surface_as_error_finish() {
        let response = provider()
            .parse_response(&json!({
                "candidates": [{
                    "finishReason": "SAFETY",
                    "content": {"parts": [{"text": ""}]}
                }]
            }))
            .expect("parse");
        assert_eq!(response.finish, FinishReason::Error);
    }
}
