use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Largest inbound websocket message accepted from the peer. Screenshots arrive as data
    /// URLs, so this is well above the usual 1 MiB.
    pub max_message_bytes: usize,
    pub browser_command_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
            max_message_bytes: 32 * 1024 * 1024,
            browser_command_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn browser_command_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_command_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_conversation_chars: usize,
    pub max_sessions: usize,
    pub bash_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-opus-4-6".to_string(),
            max_tokens: 8192,
            api_key: None,
            base_url: None,
            max_conversation_chars: 400_000,
            max_sessions: 64,
            bash_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub skills_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Offloaded tool output and saved screenshots.
    pub artifacts_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            skills_dir: base.join("skills"),
            storage_dir: base.join("storage"),
            logs_dir: base.join("logs"),
            artifacts_dir: base.join("artifacts"),
        }
    }
}

/// `~/.tabpilot`, or `./.tabpilot` when no home directory is known.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tabpilot"))
        .unwrap_or_else(|| PathBuf::from(".tabpilot"))
}
