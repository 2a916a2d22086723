use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod anthropic;
pub mod cli;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod perplexity;
pub mod sanitize;

pub use anthropic::AnthropicProvider;
pub use cli::{CliProvider, DEFAULT_CLI_TIMEOUT};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use perplexity::PerplexityProvider;
pub use sanitize::sanitize_schema;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider `{provider}` has no credentials configured")]
    MissingCredentials { provider: String },
    #[error("provider `{provider}` returned http {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("provider `{provider}` request failed: {reason}")]
    Transport { provider: String, reason: String },
    #[error("provider `{provider}` response parse failure: {reason}")]
    Parse { provider: String, reason: String },
    #[error("provider binary missing for `{provider}`: {binary}")]
    MissingBinary { provider: String, binary: String },
    #[error("provider process failed for `{provider}` with exit code {exit_code}: {stderr}")]
    NonZeroExit {
        provider: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("provider `{provider}` timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// An assistant-originated tool intent. Arguments stay an opaque JSON
/// string until the dispatcher parses them; a malformed string becomes an
/// empty object there rather than an error here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Correlation id carried by tool-role turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name carried by tool-role turns; dialects without call ids
    /// correlate results by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: &str, tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(tool_name.to_string()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like object schema: properties, required, enums.
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            model: None,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub provider: String,
    pub model: String,
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
    pub finish: FinishReason,
}

/// A concrete LM backend. `available` is true when credentials are
/// configured and the provider is not disabled; `complete` translates the
/// neutral request into the backend's dialect and back.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn available(&self) -> bool;
    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> ProviderError {
    ProviderError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Reads a provider credential from the environment, treating a blank
/// value the same as an unset one.
pub(crate) fn env_credential(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_model_override(var: &str) -> Option<String> {
    env_credential(var)
}
