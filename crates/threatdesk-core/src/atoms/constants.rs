// ── Threatdesk Atoms: Constants ────────────────────────────────────────────
// All named constants for the engine live here.

// ── Intake ─────────────────────────────────────────────────────────────────
// Number of hex characters kept from the SHA-256 digest of a payload.
pub const FINGERPRINT_LEN: usize = 8;

/// Prefix for identifiers derived from a fingerprint when the payload names none.
pub const AUTO_ID_PREFIX: &str = "auto_";

/// Characters of payload kept in the `log_preview` export field.
pub const LOG_PREVIEW_CHARS: usize = 500;

/// Timestamp layout used by exported records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Chat sessions ──────────────────────────────────────────────────────────
pub const WEBHOOK_SESSION_ID: &str = "webhook_session";
pub const CHAT_SESSION_ID: &str = "default";

// ── Models ─────────────────────────────────────────────────────────────────
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const AVAILABLE_MODELS: [&str; 3] = ["gemini-1.5-flash", "gemini-1.5-pro", "gemini-1.0-pro"];
pub const DEFAULT_TEMPERATURE: f64 = 0.6;
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const SYSTEM_PROMPT: &str = "You are a cybersecurity expert specializing in insider threat detection and log analysis.
When analyzing logs, provide comprehensive predictive and prescriptive analysis including:

PREDICTIVE ANALYSIS:
- Identify patterns that may indicate potential future security incidents
- Assess risk levels based on observed behaviors and activities
- Predict likely attack vectors or escalation paths
- Estimate probability of insider threat scenarios

PRESCRIPTIVE ANALYSIS:
- Recommend specific immediate actions to take
- Suggest preventive measures and security controls
- Provide step-by-step incident response procedures
- Recommend monitoring and detection improvements
- Suggest policy and process enhancements

Focus on behavioral indicators, technical monitoring, anomaly detection, and actionable security recommendations.
Always structure your response with clear sections for Predictive Analysis and Prescriptive Analysis.";

pub const QUICK_QUESTIONS: [&str; 6] = [
    "What are common behavioral indicators of insider threats?",
    "How can I monitor employee access to sensitive data?",
    "What technical controls help prevent insider threats?",
    "How do I investigate a suspected insider threat?",
    "Analyze recent login patterns for anomalies",
    "What are the key metrics for insider threat detection?",
];
