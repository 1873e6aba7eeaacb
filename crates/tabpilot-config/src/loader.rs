use std::path::{Path, PathBuf};

use tabpilot_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{AppConfig, base_dir};

/// Loads `AppConfig` from a TOML file and layers environment overrides on top.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Use `~/.tabpilot/config.toml`; a missing file means defaults.
    pub fn new() -> Self {
        Self { path: None }
    }

    /// Use an explicit file; it must exist.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn default_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    pub fn load(&self) -> Result<AppConfig> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env loaded: {e}");
        }

        let mut config = match &self.path {
            Some(path) => Self::read_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::read_file(&path)?
                } else {
                    debug!("no config at {}, using defaults", path.display());
                    AppConfig::default()
                }
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay environment variables onto `config`. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["TABPILOT_PORT", "WS_PORT"] {
        if let Some(raw) = lookup(key) {
            match raw.parse::<u16>() {
                Ok(port) => {
                    config.gateway.port = port;
                    break;
                }
                Err(_) => warn!("ignoring {key}={raw}: not a port number"),
            }
        }
    }

    if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
        config.agent.api_key = Some(key);
    }
    if let Some(url) = lookup("ANTHROPIC_BASE_URL").filter(|u| !u.is_empty()) {
        config.agent.base_url = Some(url);
    }
    if let Some(model) = lookup("TABPILOT_MODEL").filter(|m| !m.is_empty()) {
        config.agent.model = model;
    }
}
