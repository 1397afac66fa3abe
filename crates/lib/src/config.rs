//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Only the endpoint URL can change afterwards, through `ModelGateway::set_base_url`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::{normalize_base_url, DEFAULT_BASE_URL};

/// Model used when neither the request nor the config names one.
pub const DEFAULT_MODEL_FALLBACK: &str = "codellama";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model service endpoint, timeouts and queue limits.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Model defaults.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Background health polling.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Client-side connection retry policy.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Endpoint and request settings for the Ollama HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    /// Base URL (default "http://127.0.0.1:11434"). Overridden by OLLAMA_HOST env.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout for non-streaming calls, in milliseconds (default 30000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Timeout for the lightweight status check, in milliseconds (default 5000).
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,

    /// Maximum requests in flight at once (default 3).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retries per queued request before giving up (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

/// Model defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    /// Default model: use the exact name from `ollama list` (e.g. "llama3.2:latest").
    pub default_model: Option<String>,
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Start the health monitor with the client (default true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll interval in milliseconds (default 60000).
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_monitor_interval_ms() -> u64 {
    60_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Connection state machine retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Automatic retries after a connection failure (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step in milliseconds: the n-th retry waits n * retryDelayMs (default 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Resolve the model service base URL: env OLLAMA_HOST overrides config.
pub fn resolve_base_url(config: &Config) -> String {
    std::env::var("OLLAMA_HOST")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            config
                .ollama
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .map(|u| normalize_base_url(&u))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Resolve model name: request param, then config default, then DEFAULT_MODEL_FALLBACK.
pub fn resolve_model(config: &Config, param_model: Option<&str>) -> String {
    let non_blank = |s: &&str| !s.trim().is_empty();
    param_model
        .filter(non_blank)
        .or(config.models.default_model.as_deref().filter(non_blank))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| DEFAULT_MODEL_FALLBACK.to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".parley").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, PARLEY_CONFIG_PATH, or the default path. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
