//! Configuration loading.
//!
//! Settings come from a YAML file with serde defaults; the API key is read
//! from the environment, never from the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub import: ImportConfig,
    pub default_user: DefaultUserConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path. Defaults to `tasks.db` under the platform data
    /// directory.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskspeak")
            .join("tasks.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Deadline for one completion round-trip.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 30,
        }
    }
}

/// What happens to the pending-generation buffer after a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportRetention {
    /// Keep the buffer, so a repeated import command re-imports the same
    /// batch. Matches the historical behavior.
    #[default]
    Retain,
    /// Empty the buffer once its tasks are persisted.
    Clear,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub retention: ImportRetention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultUserConfig {
    pub username: String,
    pub email: String,
}

impl Default for DefaultUserConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            email: "admin@localhost".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, or defaults when no file is
    /// given or the default location does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = default_config_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskspeak")
        .join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.import.retention, ImportRetention::Retain);
        assert!(config.database.resolved_path().ends_with("tasks.db"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("llm:\n  model: local-llama\n").unwrap();
        assert_eq!(config.llm.model, "local-llama");
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.default_user.username, "admin");
    }

    #[test]
    fn retention_parses_from_yaml() {
        let config: Config = serde_yaml::from_str("import:\n  retention: clear\n").unwrap();
        assert_eq!(config.import.retention, ImportRetention::Clear);
    }
}
