// Threatdesk — Server Configuration
//
// TOML file (every field defaulted) + `GEMINI_API_KEY` env override + CLI
// flag overrides applied by the caller. A missing file at the default
// location means "all defaults"; a missing file the user named is an error.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use threatdesk_core::atoms::constants::AVAILABLE_MODELS;
use threatdesk_core::{EngineError, EngineResult, ProviderConfig};

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind — "127.0.0.1" (localhost) or "0.0.0.0" (all interfaces)
    #[serde(default = "default_bind")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_title")]
    pub page_title: String,
    /// Max webhook requests per IP per minute (0 = unlimited)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Seconds a client gets to deliver a complete request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_bind() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8501 }
fn default_title() -> String { "Insider Threat Detection & Log Analysis Chatbot".into() }
fn default_rate_limit() -> u32 { 60 }
fn default_request_timeout() -> u64 { 30 }

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind(),
            port: default_port(),
            page_title: default_title(),
            rate_limit_per_minute: default_rate_limit(),
            request_timeout_secs: default_request_timeout(),
            provider: ProviderConfig::default(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("threatdesk").join("config.toml"))
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(format!("Parse config: {}", e)))
    }

    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(EngineError::Config(format!("Config file {} not found", path.display())));
            }
            info!("[config] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&text)?;
        info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    /// Apply `GEMINI_API_KEY` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    }

    pub fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = key.trim().to_string();
        }
    }

    pub fn set_model(&mut self, model: &str) -> EngineResult<()> {
        if !AVAILABLE_MODELS.contains(&model) {
            return Err(EngineError::Config(format!(
                "Unknown model '{}' (available: {})",
                model,
                AVAILABLE_MODELS.join(", ")
            )));
        }
        self.provider.default_model = model.to_string();
        Ok(())
    }

    /// Fail fast when no key is configured.
    pub fn require_api_key(&self) -> EngineResult<()> {
        if self.provider.api_key.is_empty() {
            return Err(EngineError::Config(format!(
                "{} not found — set it in the environment or under [provider] api_key",
                API_KEY_ENV
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        if self.bind_address != "127.0.0.1" && self.bind_address != "localhost" {
            warn!("[config] Binding to {} — the page has no authentication", self.bind_address);
        }
        format!("{}:{}", self.bind_address, self.port)
    }
}
