use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const HISTORY_FILE_NAME: &str = ".ask_history.json";
pub const LOCAL_CONTEXT_FILE_NAME: &str = ".ask_context.local";
pub const GENERAL_CONTEXT_FILE_NAME: &str = ".ask_context.general";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModelTier {
    Lite,
    Flash,
    Pro,
}

impl ModelTier {
    pub fn model_name(self) -> &'static str {
        match self {
            ModelTier::Lite => "gemini-2.5-flash-lite-preview-06-17",
            ModelTier::Flash => "gemini-2.5-flash",
            ModelTier::Pro => "gemini-1.5-pro",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            ModelTier::Lite => "--lite",
            ModelTier::Flash => "--flash",
            ModelTier::Pro => "--pro",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_stream_timeout_secs() -> u64 {
    900
}

pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot resolve home directory")?;
    Ok(home.join(".ask"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `~/.ask/config.toml`, falling back to defaults when the file is absent.
pub fn load_config_or_default() -> Result<Config> {
    let path = config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&text).with_context(|| format!("Invalid config: {}", path.display()))?;
    Ok(cfg)
}

pub fn resolve_api_key(cfg: &Config) -> Result<String> {
    if let Ok(v) = env::var(&cfg.api_key_env) {
        if !v.trim().is_empty() {
            return Ok(v);
        }
    }
    if let Some(v) = &cfg.api_key {
        if !v.trim().is_empty() {
            return Ok(v.clone());
        }
    }
    bail!(
        "Missing API key. Set env var {} or `api_key` in {}.",
        cfg.api_key_env,
        config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "~/.ask/config.toml".to_string())
    )
}

/// Locations of the three persisted resources.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub history: PathBuf,
    pub local_context: PathBuf,
    pub general_context: PathBuf,
}

impl StorePaths {
    /// History and local context live in the working directory, general context in `$HOME`.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().context("Cannot resolve working directory")?;
        let home = dirs::home_dir().context("Cannot resolve home directory")?;
        Ok(Self::rooted(&cwd, &home))
    }

    pub fn rooted(workdir: &Path, home: &Path) -> Self {
        Self {
            history: workdir.join(HISTORY_FILE_NAME),
            local_context: workdir.join(LOCAL_CONTEXT_FILE_NAME),
            general_context: home.join(GENERAL_CONTEXT_FILE_NAME),
        }
    }
}
