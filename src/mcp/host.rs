use super::transport::LineTransport;
use super::{namespaced_tool_id, split_tool_id, McpError, DEFAULT_MCP_TIMEOUT};
use crate::audit::{AuditEvent, AuditSink, Severity};
use crate::config::McpServerSettings;
use crate::provider::ToolDefinition;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

struct ServerHandle {
    transport: LineTransport,
    tools: Vec<ToolDefinition>,
}

/// Manages external tool-server processes and exposes their tools under
/// namespaced `<server>__<tool>` ids. A server that fails to connect is
/// logged and skipped; the host never aborts the agent.
pub struct McpHost {
    servers: Mutex<BTreeMap<String, ServerHandle>>,
}

impl McpHost {
    pub fn connect(configs: &BTreeMap<String, McpServerSettings>, audit: &AuditSink) -> Self {
        let mut servers = BTreeMap::new();
        for (name, config) in configs {
            if !config.enabled {
                continue;
            }
            match Self::connect_one(name, config) {
                Ok(handle) => {
                    servers.insert(name.clone(), handle);
                }
                Err(err) => {
                    let _ = audit.record(
                        &AuditEvent::new("-", "MCP_CONNECT_FAIL", err.to_string())
                            .with_severity(Severity::Warn)
                            .with_data(json!({"server": name})),
                    );
                }
            }
        }
        Self {
            servers: Mutex::new(servers),
        }
    }

    pub fn empty() -> Self {
        Self {
            servers: Mutex::new(BTreeMap::new()),
        }
    }

    fn connect_one(name: &str, config: &McpServerSettings) -> Result<ServerHandle, McpError> {
        let mut transport =
            LineTransport::spawn(name, &config.command, &config.args, &config.env)?;
        let result = transport.request("tools/list", json!({}), DEFAULT_MCP_TIMEOUT)?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|tool| {
                let tool_name = tool.get("name").and_then(Value::as_str)?;
                Some(ToolDefinition {
                    name: namespaced_tool_id(name, tool_name),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
            })
            .collect();
        Ok(ServerHandle { transport, tools })
    }

    pub fn connected_servers(&self) -> Vec<String> {
        match self.servers.lock() {
            Ok(servers) => servers.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        match self.servers.lock() {
            Ok(servers) => servers
                .values()
                .flat_map(|handle| handle.tools.iter().cloned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn owns_tool(&self, namespaced: &str) -> bool {
        let Some((server, _)) = split_tool_id(namespaced) else {
            return false;
        };
        match self.servers.lock() {
            Ok(servers) => servers
                .get(server)
                .map(|handle| handle.tools.iter().any(|tool| tool.name == namespaced))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn call_tool(&self, namespaced: &str, arguments: &Value) -> Result<Value, McpError> {
        let (server, tool) = split_tool_id(namespaced).ok_or_else(|| McpError::UnknownTool {
            name: namespaced.to_string(),
        })?;
        let mut servers = self.servers.lock().map_err(|_| McpError::Poisoned {
            server: server.to_string(),
        })?;
        let handle = servers.get_mut(server).ok_or_else(|| McpError::UnknownTool {
            name: namespaced.to_string(),
        })?;
        handle.transport.request(
            "tools/call",
            json!({"name": tool, "arguments": arguments}),
            DEFAULT_MCP_TIMEOUT,
        )
    }

    /// Closes every transport. Safe to call more than once; later calls
    /// find an empty map.
    pub fn shutdown(&self) {
        let drained = match self.servers.lock() {
            Ok(mut servers) => std::mem::take(&mut *servers),
            Err(_) => return,
        };
        for (_, handle) in drained {
            handle.transport.close();
        }
    }
}
