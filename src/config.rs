use std::path::{Path, PathBuf};

pub mod settings;

pub use settings::{
    AgentBudgets, McpServerSettings, ProviderSettings, SandboxSettings, Settings,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("failed to resolve home directory for state root")]
    HomeDirectoryUnavailable,
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Read {
        path: path.display().to_string(),
        source,
    }
}

/// Default state root (`<home>/.operant`) for journal and backup files.
pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(home.join(".operant"))
}
