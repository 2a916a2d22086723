pub mod host;
pub mod transport;

pub use host::McpHost;
pub use transport::LineTransport;

use std::time::Duration;

/// Proxy calls share the subprocess budget used elsewhere in the core.
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(120);

/// Separator between a server name and one of its tool names in the
/// namespaced id registered with the dispatcher.
pub const TOOL_NAMESPACE_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to spawn mcp server `{server}`: {reason}")]
    Spawn { server: String, reason: String },
    #[error("io error talking to mcp server `{server}`: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("mcp server `{server}` timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },
    #[error("mcp server `{server}` protocol error: {reason}")]
    Protocol { server: String, reason: String },
    #[error("no mcp server owns tool `{name}`")]
    UnknownTool { name: String },
    #[error("mcp transport lock poisoned for server `{server}`")]
    Poisoned { server: String },
}

pub fn namespaced_tool_id(server: &str, tool: &str) -> String {
    format!("{server}{TOOL_NAMESPACE_SEPARATOR}{tool}")
}

pub fn split_tool_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(TOOL_NAMESPACE_SEPARATOR)
}
