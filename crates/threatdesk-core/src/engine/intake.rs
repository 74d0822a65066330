// Threatdesk Engine — Webhook Intake
//
// Turns the raw `prompt` query value of an inbound request into a
// `WebhookPayload`: percent-decoded text, the analysis identifier named in
// the text (if any) and the content fingerprint used for deduplication.
//
// Identifier rules are an ordered, tagged list; the first rule whose
// pattern matches wins. Absence of a match is a normal outcome.

use crate::atoms::constants::{AUTO_ID_PREFIX, FINGERPRINT_LEN};
use log::{debug, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::string::FromUtf8Error;
use std::sync::LazyLock;

// ── Identifier Extraction ──────────────────────────────────────────────

struct IdRule {
    tag: &'static str,
    regex: Regex,
}

static ID_RULES: LazyLock<Vec<IdRule>> = LazyLock::new(|| {
    let rules = [
        // Label and token share a line: `[ \t]`, never `\s`.
        ("analysis-id", r"(?i)Analysis ID:[ \t]*([A-Za-z0-9-]+)"),
        ("request", r"(?i)REQUEST[ \t]*#([A-Za-z0-9-]+)"),
        ("analysis-request", r"(?i)analysis request[ \t]*#([A-Za-z0-9-]+)"),
    ];

    rules
        .into_iter()
        .filter_map(|(tag, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(IdRule { tag, regex }),
            Err(e) => {
                warn!("[intake] Failed to compile id rule '{}': {}", tag, e);
                None
            }
        })
        .collect()
});

/// Return the analysis identifier named in `text`, trying each rule in order.
pub fn extract_analysis_id(text: &str) -> Option<String> {
    ID_RULES.iter().find_map(|rule| {
        let caps = rule.regex.captures(text)?;
        let id = caps.get(1)?.as_str().to_string();
        debug!("[intake] id rule '{}' matched: {}", rule.tag, id);
        Some(id)
    })
}

// ── Fingerprinting ─────────────────────────────────────────────────────

/// Short deterministic digest of the payload bytes: the first
/// `FINGERPRINT_LEN` hex characters of its SHA-256.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

// ── Query Handling ─────────────────────────────────────────────────────

/// Find the still-encoded value of the `prompt` parameter in a raw query
/// string (the part after `?`). A parameter present with an empty value is
/// reported as `Some("")`.
pub fn find_prompt_param(query: &str) -> Option<&str> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == "prompt").then_some(value)
        })
        .next()
}

/// Percent-decode a query value. `+` and `%20` both decode to a space.
/// `Ok(None)` for a blank value, `Err` for undecodable input (invalid UTF-8).
pub fn decode_prompt(raw: &str) -> Result<Option<String>, FromUtf8Error> {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(text.into_owned())),
        Err(e) => {
            warn!("[intake] Undecodable prompt parameter ({} bytes): {}", raw.len(), e);
            Err(e)
        }
    }
}

// ── Payload ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPayload {
    pub text: String,
    pub analysis_id: Option<String>,
    pub fingerprint: String,
}

impl WebhookPayload {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        WebhookPayload {
            analysis_id: extract_analysis_id(&text),
            fingerprint: fingerprint(&text),
            text,
        }
    }

    /// Build a payload from a raw query string. `Ok(None)` when `prompt` is
    /// absent or blank; `Err` when it is present but undecodable.
    pub fn from_query(query: &str) -> Result<Option<Self>, FromUtf8Error> {
        match find_prompt_param(query) {
            Some(raw) => Ok(decode_prompt(raw)?.map(Self::new)),
            None => Ok(None),
        }
    }

    /// Ledger key: the extracted identifier, or `auto_<fingerprint>`.
    pub fn resolved_id(&self) -> String {
        self.analysis_id
            .clone()
            .unwrap_or_else(|| format!("{}{}", AUTO_ID_PREFIX, self.fingerprint))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
