use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InferenceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Cheaper model used by the fast code fixer and setup assistant.
    pub fast_model: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ApiRateLimitConfig {
    pub limit: u32,
    pub period_secs: u64,
    pub burst: Option<u32>,
}

impl Default for ApiRateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            period_secs: 60,
            burst: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub custom_domain: Option<String>,
    pub environment: Environment,
    pub inference: InferenceConfig,
    pub github_api_base: String,
    pub screenshot_api_url: Option<String>,
    pub api_rate_limit: ApiRateLimitConfig,
    pub fast_smart_fixes_enabled: bool,
    pub csrf_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
            custom_domain: None,
            environment: Environment::default(),
            inference: InferenceConfig::default(),
            github_api_base: "https://api.github.com".to_string(),
            screenshot_api_url: None,
            api_rate_limit: ApiRateLimitConfig::default(),
            fast_smart_fixes_enabled: true,
            csrf_secret: None,
        }
    }
}

impl Config {
    /// Parse a raw config file, falling back to defaults on any error.
    pub fn from_raw(raw: &str) -> Config {
        match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Invalid config file, using defaults: {err}");
                Config::default()
            }
        }
    }

    /// Environment variables override whatever was on disk.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.trim().parse() {
                self.port = port;
            }
        }
        if let Ok(host) = std::env::var("HOST") {
            self.host = host;
        }
        if let Ok(domain) = std::env::var("CUSTOM_DOMAIN") {
            if !domain.is_empty() {
                self.custom_domain = Some(domain);
            }
        }
        // NODE_ENV is honored for parity with the frontend tooling.
        if let Ok(env) = std::env::var("VIBESDK_ENV").or_else(|_| std::env::var("NODE_ENV")) {
            self.environment = match env.as_str() {
                "development" => Environment::Development,
                _ => Environment::Production,
            };
        }
        if let Ok(key) = std::env::var("INFERENCE_API_KEY") {
            if !key.is_empty() {
                self.inference.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("INFERENCE_BASE_URL") {
            if !url.is_empty() {
                self.inference.base_url = url;
            }
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Will always return config, falling back to defaults on missing/invalid files.
pub async fn load_config_from_file(config_path: &PathBuf) -> Config {
    match std::fs::read_to_string(config_path) {
        Ok(raw_config) => Config::from_raw(&raw_config),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::info!("No config file found, creating one");
            } else {
                tracing::warn!("Failed to read config file: {}", err);
            }
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(config: &Config, config_path: &PathBuf) -> Result<(), ConfigError> {
    let raw_config = serde_json::to_string_pretty(config)?;
    std::fs::write(config_path, raw_config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_raw_config_falls_back_to_defaults() {
        let config = Config::from_raw("not json at all");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let config = Config::from_raw(r#"{"port": 8080}"#);
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.github_api_base, "https://api.github.com");
    }
}
