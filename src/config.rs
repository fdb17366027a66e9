use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Key callers must present (x-api-key or bearer) to use the relay.
    pub proxy_access_key: String,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default = "default_true")]
    pub enable_web_ui: bool,
    /// Name of the active channel. Selected by the admin, not by the relay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_upstream: Option<String>,
    /// Key-selection policy name. The scheduler implements "sequential";
    /// the value is surfaced as-is in /health.
    #[serde(default = "default_load_balance")]
    pub load_balance: String,
    #[serde(default)]
    pub upstreams: Vec<UpstreamChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChannel {
    pub name: String,
    pub service_type: ServiceType,
    pub base_url: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Caller model -> upstream model. Opaque to routing; applied by the
    /// request translators.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Claude,
    Openai,
    #[serde(rename = "openaiold")]
    OpenaiOld,
    Gemini,
    /// Anything else in the config file. Requests against such a channel are
    /// rejected with 400 instead of failing config load.
    #[serde(other)]
    Unknown,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Openai => "openai",
            Self::OpenaiOld => "openaiold",
            Self::Gemini => "gemini",
            Self::Unknown => "unknown",
        }
    }
}

fn default_port() -> u16 {
    4222
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_load_balance() -> String {
    "sequential".to_string()
}

fn default_true() -> bool {
    true
}

impl RelayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<(Self, PathBuf)> {
        if let Some(path) = explicit_path {
            return Ok((Self::load(path)?, path.to_path_buf()));
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Ok((Self::load(candidate)?, candidate.clone()));
            }
        }

        Err(RelayError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn validate(&self) -> Result<()> {
        if self.proxy_access_key.is_empty() {
            return Err(RelayError::config(
                "proxy_access_key must be set (config file or PROXY_ACCESS_KEY)",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for channel in &self.upstreams {
            if channel.name.is_empty() {
                return Err(RelayError::config("upstream channel with empty name"));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(RelayError::config(format!(
                    "duplicate upstream channel name '{}'",
                    channel.name
                )));
            }
        }

        if let Some(ref current) = self.current_upstream {
            if !self.upstreams.iter().any(|c| &c.name == current) {
                return Err(RelayError::config(format!(
                    "current_upstream '{current}' does not match any configured channel"
                )));
            }
        }

        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&UpstreamChannel> {
        self.upstreams.iter().find(|c| c.name == name)
    }

    /// The active channel: `current_upstream` if set, else the first one.
    pub fn current_channel(&self) -> Option<&UpstreamChannel> {
        match self.current_upstream {
            Some(ref name) => self.channel(name),
            None => self.upstreams.first(),
        }
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("claude-relay.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-relay")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-relay").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("claude-relay").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
