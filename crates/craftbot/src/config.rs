//! Configuration management for the craftbot agent.
//!
//! Configuration is read once at startup from a YAML file:
//!
//! ```yaml
//! minecraft:
//!   server_host: localhost
//!   server_port: 25565
//!   username: AgentBot1
//!   password: ${MINECRAFT_PASSWORD}
//! openai:
//!   api_key: ${OPENAI_API_KEY}
//!   model: gpt-4o
//! memory:
//!   db_path: agent_memory.jsonl
//! ```
//!
//! Credentials can come from the environment: `OPENAI_API_KEY` and
//! `MINECRAFT_PASSWORD` take precedence over the stored values, and a stored
//! value of the form `${VAR}` is looked up in the environment.

use anyhow::{Context, Result};
use craftbot_core::completion::DEFAULT_BASE_URL;
use craftbot_core::{ReconnectPolicy, SessionIdentity};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cli::CliArgs;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const MINECRAFT_PASSWORD_ENV: &str = "MINECRAFT_PASSWORD";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Game server connection settings
    pub minecraft: MinecraftSettings,
    /// Completion service settings
    #[serde(default)]
    pub openai: OpenAiSettings,
    /// Chat history storage
    #[serde(default)]
    pub memory: MemorySettings,
    /// Reconnection behaviour
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinecraftSettings {
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// WebSocket path on the server
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_server_port() -> u16 {
    25565
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Append-only chat history file
    pub db_path: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            db_path: "agent_memory.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_initial_attempts: u32,
    pub initial_delay_secs: u64,
    pub backoff_multiplier: f64,
    pub steady_state_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_initial_attempts: 3,
            initial_delay_secs: 5,
            backoff_multiplier: 2.0,
            steady_state_delay_secs: 5,
            poll_interval_ms: 1000,
            connect_timeout_secs: 15,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Append-only log file, also read by the presence viewer
    pub file_path: String,
    /// Whether to output console logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: "agent.log".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads and resolves the configuration file.
    ///
    /// Reads the YAML at `path`, fills unset sections with their defaults and
    /// applies environment overrides. A missing file is an error: there is no
    /// sensible default server.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    ///
    /// The resolved configuration, not yet validated. Call
    /// [`AppConfig::validate`] after applying CLI overrides.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies credential overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    /// Applies credential overrides using `lookup` to read variables.
    ///
    /// `${VAR}` placeholders in `openai.api_key` and `minecraft.password` are
    /// resolved first; an unset variable leaves the key empty and the
    /// password unset. `OPENAI_API_KEY` and `MINECRAFT_PASSWORD` then take
    /// precedence over whatever the file held.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(var) = placeholder(&self.openai.api_key) {
            self.openai.api_key = lookup(var).unwrap_or_default();
        }
        if let Some(var) = self.minecraft.password.as_deref().and_then(placeholder) {
            self.minecraft.password = lookup(var);
        }

        if let Some(key) = lookup(OPENAI_API_KEY_ENV) {
            self.openai.api_key = key;
        }
        if let Some(password) = lookup(MINECRAFT_PASSWORD_ENV) {
            self.minecraft.password = Some(password);
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is usable, or a message naming the
    /// first offending field. Reconnect errors are prefixed with `reconnect:`.
    pub fn validate(&self) -> Result<(), String> {
        if self.minecraft.server_host.trim().is_empty() {
            return Err("minecraft.server_host cannot be empty".to_string());
        }
        if self.minecraft.server_port == 0 {
            return Err("minecraft.server_port cannot be 0".to_string());
        }
        if self.minecraft.username.trim().is_empty() {
            return Err("minecraft.username cannot be empty".to_string());
        }
        if self.openai.model.trim().is_empty() {
            return Err("openai.model cannot be empty".to_string());
        }
        if self.memory.db_path.trim().is_empty() {
            return Err("memory.db_path cannot be empty".to_string());
        }

        self.to_reconnect_policy()
            .validate()
            .map_err(|e| format!("reconnect: {e}"))?;

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn to_session_identity(&self) -> SessionIdentity {
        let mut identity = SessionIdentity::new(
            self.minecraft.server_host.clone(),
            self.minecraft.server_port,
            self.minecraft.username.clone(),
        );
        identity.path = self.minecraft.path.clone();
        identity.password = self.minecraft.password.clone().filter(|p| !p.is_empty());
        identity.connect_timeout = Duration::from_secs(self.reconnect.connect_timeout_secs);
        identity
    }

    pub fn to_reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_initial_attempts: self.reconnect.max_initial_attempts,
            initial_delay: Duration::from_secs(self.reconnect.initial_delay_secs),
            backoff_multiplier: self.reconnect.backoff_multiplier,
            steady_state_delay: Duration::from_secs(self.reconnect.steady_state_delay_secs),
            poll_interval: Duration::from_millis(self.reconnect.poll_interval_ms),
        }
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }
}

/// Variable name inside a `${VAR}` placeholder.
fn placeholder(value: &str) -> Option<&str> {
    value
        .trim()
        .strip_prefix("${")?
        .strip_suffix('}')
        .filter(|name| !name.is_empty())
}
