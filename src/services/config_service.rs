use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Fully resolved settings: env vars override the config file, base URL and
/// model fall back to defaults, the API key is required.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: Option<f32>,
}

pub fn get_app_data_dir() -> Result<PathBuf, String> {
    let data_dir = dirs::data_dir()
        .ok_or("Could not find data directory")?
        .join("Grantline");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).map_err(|e| e.to_string())?;
    }

    Ok(data_dir)
}

fn get_config_path() -> Result<PathBuf, String> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config() -> Result<Config, String> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

pub fn save_config(config: &Config) -> Result<(), String> {
    let config_path = get_config_path()?;
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(())
}

pub fn set_api_key(key: &str) -> Result<(), String> {
    let mut config = load_config().unwrap_or_default();
    config.api_key = Some(key.to_string());
    save_config(&config)
}

pub fn set_base_url(url: &str) -> Result<(), String> {
    let mut config = load_config().unwrap_or_default();
    config.base_url = Some(url.to_string());
    save_config(&config)
}

pub fn set_model(model: &str) -> Result<(), String> {
    let mut config = load_config().unwrap_or_default();
    config.model = Some(model.to_string());
    save_config(&config)
}

/// Resolve the effective settings from a loaded config and an environment
/// lookup. Pure so precedence can be tested without touching the real
/// config file or process environment.
pub fn resolve(
    config: Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EffectiveConfig, String> {
    let base_url = env("GRANTLINE_BASE_URL")
        .or(config.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let model = env("GRANTLINE_MODEL")
        .or(config.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let api_key = env("GRANTLINE_API_KEY")
        .or(config.api_key)
        .filter(|key| !key.is_empty())
        .ok_or("No API key configured. Set GRANTLINE_API_KEY or add it to config.json.")?;

    Ok(EffectiveConfig {
        base_url,
        model,
        api_key,
        temperature: config.temperature,
    })
}

pub fn get_effective_config() -> Result<EffectiveConfig, String> {
    resolve(load_config().unwrap_or_default(), |key| env::var(key).ok())
}
