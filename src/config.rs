use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_REFRESH_SECONDS: u64 = 5;
const MAX_REFRESH_SECONDS: u64 = 3600;
const DEFAULT_GIT_PROBE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_GIT_QUERY_TIMEOUT_SECONDS: u64 = 10;
const MIN_DISPLAY_WIDTH: usize = 10;
const CONFIG_SCHEMA_VERSION: u32 = 1;
const CONFIG_FILE_NAME: &str = "claude-status.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    pub schema_version: u32,
    pub refresh_seconds: u64,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Fixed render width; detected from the terminal when unset.
    pub width: Option<usize>,
    pub show_ages: bool,
    pub footer: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub refresh_interval: Duration,
    pub git_probe_timeout: Duration,
    pub git_query_timeout: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            refresh_seconds: DEFAULT_REFRESH_SECONDS,
            display: DisplayConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: None,
            show_ages: true,
            footer: true,
        }
    }
}

impl StatusConfig {
    /// Reads the config file if one exists. The file is never created.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut parsed: StatusConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        if parsed.normalize() {
            warn!(path = %path.display(), "config contained out-of-range values; using defaults for them");
        }
        Ok(parsed)
    }

    fn normalize(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version != CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
        }

        if self.refresh_seconds == 0 || self.refresh_seconds > MAX_REFRESH_SECONDS {
            self.refresh_seconds = DEFAULT_REFRESH_SECONDS;
            changed = true;
        }

        if self
            .display
            .width
            .is_some_and(|width| width < MIN_DISPLAY_WIDTH)
        {
            self.display.width = None;
            changed = true;
        }

        changed
    }
}

pub fn runtime_settings(config: &StatusConfig) -> RuntimeSettings {
    RuntimeSettings {
        refresh_interval: Duration::from_secs(
            env_u64("CLAUDE_STATUS_REFRESH_SECONDS", config.refresh_seconds)
                .min(MAX_REFRESH_SECONDS),
        ),
        git_probe_timeout: Duration::from_secs(env_u64(
            "CLAUDE_STATUS_GIT_PROBE_TIMEOUT_SECONDS",
            DEFAULT_GIT_PROBE_TIMEOUT_SECONDS,
        )),
        git_query_timeout: Duration::from_secs(env_u64(
            "CLAUDE_STATUS_GIT_QUERY_TIMEOUT_SECONDS",
            DEFAULT_GIT_QUERY_TIMEOUT_SECONDS,
        )),
    }
}

pub fn claude_home() -> PathBuf {
    if let Ok(custom) = env::var("CLAUDE_CONFIG_DIR") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

pub fn projects_root() -> PathBuf {
    claude_home().join("projects")
}

pub fn config_path() -> PathBuf {
    claude_home().join(CONFIG_FILE_NAME)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
