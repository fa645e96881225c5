//! Configuration management for Tune
//!
//! Loads and saves the JSON config file, with environment fallbacks for
//! secrets that usually come from the login flow.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, expand_home, threads_dir};

/// Env var consulted when no model API key is configured
pub const MODEL_API_KEY_ENV: &str = "GROQ_API_KEY";
/// Env var consulted when no Spotify access token is configured
pub const SPOTIFY_TOKEN_ENV: &str = "SPOTIFY_ACCESS_TOKEN";
/// Env var consulted when no Spotify user id is configured
pub const SPOTIFY_USER_ENV: &str = "SPOTIFY_USER_ID";

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Language model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_model_timeout() -> u64 {
    60
}

/// Backoff policy for transient tool failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    8_000
}

/// Agent loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum Agent→Tools round trips within one turn
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_tools: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
            max_in_flight_tools: default_max_in_flight(),
            tool_timeout_secs: default_tool_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_round_trips() -> u32 {
    8
}

fn default_max_in_flight() -> usize {
    4
}

fn default_tool_timeout() -> u64 {
    20
}

/// Spotify Web API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default = "default_spotify_api")]
    pub api_base: String,
    #[serde(default = "default_spotify_accounts")]
    pub accounts_base: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base: default_spotify_api(),
            accounts_base: default_spotify_accounts(),
            access_token: String::new(),
            user_id: String::new(),
            refresh_token: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

fn default_spotify_api() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_spotify_accounts() -> String {
    "https://accounts.spotify.com".to_string()
}

/// Thread checkpoint storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> String {
    "~/.tune/threads".to_string()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location, falling back to defaults when absent
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("writing config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Model API key, config first then `GROQ_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        non_empty(&self.model.api_key).or_else(|| env_non_empty(MODEL_API_KEY_ENV))
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn api_base(&self) -> Option<String> {
        self.model.api_base.as_deref().and_then(non_empty)
    }

    pub fn default_model(&self) -> String {
        self.model.model.clone()
    }

    /// Spotify bearer token, config first then `SPOTIFY_ACCESS_TOKEN`
    pub fn spotify_access_token(&self) -> Option<String> {
        non_empty(&self.spotify.access_token).or_else(|| env_non_empty(SPOTIFY_TOKEN_ENV))
    }

    /// Spotify user id, config first then `SPOTIFY_USER_ID`
    pub fn spotify_user_id(&self) -> Option<String> {
        non_empty(&self.spotify.user_id).or_else(|| env_non_empty(SPOTIFY_USER_ENV))
    }

    /// True when a refresh-token grant can be performed
    pub fn spotify_can_refresh(&self) -> bool {
        !self.spotify.refresh_token.is_empty()
            && !self.spotify.client_id.is_empty()
            && !self.spotify.client_secret.is_empty()
    }

    /// Resolved checkpoint directory
    pub fn checkpoint_dir(&self) -> PathBuf {
        expand_home(&self.checkpoints.dir)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().as_deref().and_then(non_empty)
}

/// Create the config file and checkpoint directory if missing
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("config created at {:?}", config_path);
    }

    let config = Config::load().await?;
    let threads = config.checkpoint_dir();
    tokio::fs::create_dir_all(&threads).await?;
    info!("thread checkpoints at {:?}", threads);

    Ok(config)
}
