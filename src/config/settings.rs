use super::{io_error, ConfigError};
use crate::router::rules::RoutingRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Durable artifacts: audit store, stream log, memo overlay.
    pub data_dir: PathBuf,
    /// Journal records and backup artifacts.
    pub state_dir: PathBuf,
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub agent: AgentBudgets,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxSettings {
    /// Filesystem effects must resolve under this prefix.
    pub allowed_root: PathBuf,
    /// Shell commands must match one of these patterns.
    #[serde(default = "default_terminal_whitelist")]
    pub terminal_whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AgentBudgets {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AgentBudgets {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls: default_max_tool_calls(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|err| io_error(path, err))?;
        serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            source: err,
        })
    }

    /// Minimal settings rooted at one directory; used by tests and by the
    /// embedding layer when no settings file exists yet.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            state_dir: root.join("state"),
            sandbox: SandboxSettings {
                allowed_root: root.join("workspace"),
                terminal_whitelist: default_terminal_whitelist(),
            },
            providers: BTreeMap::new(),
            default_provider: None,
            agent: AgentBudgets::default(),
            routing_rules: Vec::new(),
            mcp_servers: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sandbox.allowed_root.is_absolute() {
            return Err(ConfigError::Settings(format!(
                "sandbox.allowed_root must be absolute, got `{}`",
                self.sandbox.allowed_root.display()
            )));
        }
        for pattern in &self.sandbox.terminal_whitelist {
            regex::Regex::new(pattern).map_err(|err| {
                ConfigError::Settings(format!(
                    "invalid terminal whitelist pattern `{pattern}`: {err}"
                ))
            })?;
        }
        if let Some(default) = &self.default_provider {
            if !self.providers.is_empty() && !self.providers.contains_key(default) {
                return Err(ConfigError::Settings(format!(
                    "default_provider `{default}` is not declared in providers"
                )));
            }
        }
        for (name, server) in &self.mcp_servers {
            if server.command.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "mcp server `{name}` has an empty command"
                )));
            }
        }
        Ok(())
    }

    /// Environment overlay applied after load. Only variables with
    /// observable core behavior are consulted.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DEFAULT_AI_PROVIDER") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.default_provider = Some(trimmed.to_ascii_lowercase());
            }
        }
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.state_dir.join("journal")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.data_dir.join("audit.sqlite3")
    }

    pub fn stream_log_path(&self) -> PathBuf {
        self.data_dir.join("logs/agent.log")
    }

    pub fn memo_path(&self) -> PathBuf {
        self.data_dir.join("memo.json")
    }
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    25
}

fn default_max_tool_calls() -> u32 {
    50
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_terminal_whitelist() -> Vec<String> {
    [
        r"^ls(\s|$)",
        r"^cat\s",
        r"^echo\s",
        r"^pwd$",
        r"^date(\s|$)",
        r"^git\s+(status|log|diff)(\s|$)",
        r"^\./[\w./-]+\.sh(\s|$)",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_from_yaml() {
        let yaml = r#"
data_dir: /tmp/operant/data
state_dir: /tmp/operant/state
sandbox:
  allowed_root: /tmp/operant/workspace
providers:
  anthropic:
    model: claude-sonnet-4-5
  openai:
    enabled: false
default_provider: anthropic
agent:
  max_iterations: 10
"#;
        let settings: Settings = serde_yaml::from_str(yaml).expect("parse");
        settings.validate().expect("valid");
        assert_eq!(settings.agent.max_iterations, 10);
        assert_eq!(settings.agent.max_tool_calls, 50);
        assert!(settings.providers["anthropic"].enabled);
        assert!(!settings.providers["openai"].enabled);
        assert_eq!(
            settings.journal_dir(),
            PathBuf::from("/tmp/operant/state/journal")
        );
    }

    #[test]
    fn validation_rejects_relative_sandbox_root() {
        let mut settings = Settings::rooted_at(Path::new("/tmp/operant"));
        settings.sandbox.allowed_root = PathBuf::from("relative/root");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_whitelist_pattern() {
        let mut settings = Settings::rooted_at(Path::new("/tmp/operant"));
        settings.sandbox.terminal_whitelist = vec!["([unclosed".to_string()];
        assert!(settings.validate().is_err());
    }
}
