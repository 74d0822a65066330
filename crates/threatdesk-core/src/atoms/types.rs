// ── Threatdesk Atoms: Core Types ───────────────────────────────────────────
// Data structures that flow through intake, dispatch and the ledger.
// They are independent of the chat backend in use.

use crate::atoms::constants::{
    DEFAULT_MODEL, DEFAULT_TEMPERATURE, GEMINI_BASE_URL, LOG_PREVIEW_CHARS, TIMESTAMP_FORMAT,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Backend Config ─────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_model() -> String { DEFAULT_MODEL.into() }
fn default_temperature() -> f64 { DEFAULT_TEMPERATURE }

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(GEMINI_BASE_URL)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            api_key: String::new(),
            base_url: None,
            default_model: default_model(),
            temperature: default_temperature(),
        }
    }
}

// Never print the key.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

// ── Messages ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }
}

// ── Analysis Records ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed (or failed) webhook analysis, keyed in the ledger by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub id: String,
    pub created_at: DateTime<Local>,
    pub prompt: String,
    pub response: String,
    pub status: AnalysisStatus,
    pub fingerprint: String,
    pub model: String,
}

impl AnalysisRecord {
    /// First `LOG_PREVIEW_CHARS` characters of the payload.
    pub fn log_preview(&self) -> String {
        self.prompt.chars().take(LOG_PREVIEW_CHARS).collect()
    }

    pub fn timestamp(&self) -> String {
        self.created_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn export(&self) -> ExportRecord {
        ExportRecord {
            timestamp: self.timestamp(),
            prompt: self.prompt.clone(),
            response: self.response.clone(),
            status: self.status,
            log_preview: self.log_preview(),
        }
    }
}

/// Download/export shape of an [`AnalysisRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRecord {
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
    pub status: AnalysisStatus,
    pub log_preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(prompt: &str) -> AnalysisRecord {
        AnalysisRecord {
            id: "A1".into(),
            created_at: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            prompt: prompt.into(),
            response: "ok".into(),
            status: AnalysisStatus::Completed,
            fingerprint: "deadbeef".into(),
            model: DEFAULT_MODEL.into(),
        }
    }

    #[test]
    fn test_export_fields() {
        let json = serde_json::to_value(record("failed logins").export()).unwrap();
        assert_eq!(json["timestamp"], "2024-03-09 14:05:07");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["prompt"], "failed logins");
        assert_eq!(json["log_preview"], "failed logins");
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_log_preview_truncates_by_chars() {
        let long = "é".repeat(LOG_PREVIEW_CHARS + 20);
        let preview = record(&long).log_preview();
        assert_eq!(preview.chars().count(), LOG_PREVIEW_CHARS);
    }

    #[test]
    fn test_provider_config_debug_redacts_key() {
        let cfg = ProviderConfig { api_key: "AIza-secret".into(), ..Default::default() };
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("AIza-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn test_provider_config_defaults_from_empty_toml_shape() {
        let cfg: ProviderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.default_model, DEFAULT_MODEL);
        assert_eq!(cfg.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.base_url(), GEMINI_BASE_URL);
    }
}
