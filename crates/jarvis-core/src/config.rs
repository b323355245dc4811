//! Configuration management for Jarvis.
//!
//! Loads configuration from ${JARVIS_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for Jarvis configuration and data directories.
    //!
    //! JARVIS_HOME resolution order:
    //! 1. JARVIS_HOME environment variable (if set)
    //! 2. ~/.jarvis (default)

    use std::path::PathBuf;

    /// Returns the Jarvis home directory.
    pub fn jarvis_home() -> PathBuf {
        if let Ok(home) = std::env::var("JARVIS_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(|| PathBuf::from(".jarvis"), |h| h.join(".jarvis"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        jarvis_home().join("config.toml")
    }

    /// Subdirectory names under the home directory.
    pub const SKILLS_DIR: &str = "skills";
    pub const TOOLS_DIR: &str = "tools";
    pub const MCP_DIR: &str = "mcp";
    pub const LOGS_DIR: &str = "logs";

    /// Directory holding skills written by `create_skill`.
    pub fn skills_dir() -> PathBuf {
        jarvis_home().join(SKILLS_DIR)
    }

    /// Directory holding tool scripts written by `create_tool`.
    pub fn tools_dir() -> PathBuf {
        jarvis_home().join(TOOLS_DIR)
    }

    /// Directory holding MCP server projects written by `create_mcp`.
    pub fn mcp_dir() -> PathBuf {
        jarvis_home().join(MCP_DIR)
    }

    pub fn logs_dir() -> PathBuf {
        jarvis_home().join(LOGS_DIR)
    }
}

/// Chat completions endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL; requests go to `{base_url}/v1/chat/completions`.
    pub base_url: String,
    /// Bearer token. Falls back to `JARVIS_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: Config::DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model name sent with every request
    pub model: String,

    /// Maximum tokens per model reply
    pub max_tokens: u32,

    /// Maximum model/tool round trips per user turn
    pub max_rounds: usize,

    /// Number of trailing history messages sent per request
    pub history_window: usize,

    /// Connect and read timeout for model requests in seconds
    pub request_timeout_secs: u64,

    /// Outer timeout for a single tool execution in seconds (0 disables)
    pub tool_timeout_secs: u64,

    /// Optional replacement for the built-in persona paragraph
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            max_rounds: Self::DEFAULT_MAX_ROUNDS,
            history_window: Self::DEFAULT_HISTORY_WINDOW,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            tool_timeout_secs: 0,
            system_prompt: None,
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    pub const DEFAULT_MODEL: &str = "claude-sonnet-4";
    pub const DEFAULT_BASE_URL: &str = "http://localhost:23335/api/openai";
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;
    pub const DEFAULT_MAX_ROUNDS: usize = 10;
    pub const DEFAULT_HISTORY_WINDOW: usize = 20;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move config into {}", path.display()))
    }

    /// Returns the tool timeout as a Duration, or None if disabled (0).
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
