// ── Threatdesk Atoms: Chat Backend Trait ───────────────────────────────────
// The dispatcher talks to the hosted model only through `ChatBackend`.
// Concrete backends live in engine/providers; tests plug in mocks.

use crate::atoms::types::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single backend round trip.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Connection, TLS, timeout or stream read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rejected credentials (401/403 or an invalid API key).
    #[error("Auth error: {0}")]
    Auth(String),

    /// The requested model does not exist for this API version.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Any other non-success HTTP status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: Option<u64> },

    /// The model produced no usable content (safety filter etc.).
    #[error("Response blocked: {0}")]
    Blocked(String),
}

/// One outbound chat turn.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub input: &'a str,
    pub session_id: &'a str,
    pub model: &'a str,
    /// Prior user/assistant turns, oldest first. Never includes `input`.
    pub history: &'a [ChatMessage],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    /// Model version reported by the backend, when it reports one.
    pub model: Option<String>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatReply, ProviderError>;
}
