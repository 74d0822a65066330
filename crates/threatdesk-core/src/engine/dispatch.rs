// Threatdesk Engine — Dispatch
//
// The decision point between an inbound payload and the chat backend:
//   1. fingerprint already processed → short-circuit, backend untouched
//   2. otherwise mark it, resolve the identifier, call the backend once and
//      write exactly one ledger record (`completed` or `error`)
//
// Typed chat goes through `ask`, which shares the conversation history but
// never touches the ledger or the fingerprint set.
//
// Callers serialize dispatch: one `&mut SessionContext` at a time.

use crate::atoms::constants::{AVAILABLE_MODELS, CHAT_SESSION_ID, WEBHOOK_SESSION_ID};
use crate::atoms::traits::{ChatBackend, ChatRequest, ProviderError};
use crate::atoms::types::{AnalysisRecord, AnalysisStatus};
use crate::engine::intake::WebhookPayload;
use crate::engine::session::SessionContext;
use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

// ── Failure Classification ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ModelNotFound,
    Auth,
    Other,
}

impl FailureKind {
    /// Typed variants first, then the message heuristics the hosted API
    /// forces on us (404 bodies and "API key not valid" arrive as 400s).
    pub fn classify(err: &ProviderError) -> Self {
        match err {
            ProviderError::ModelNotFound(_) | ProviderError::Api { status: 404, .. } => {
                FailureKind::ModelNotFound
            }
            ProviderError::Auth(_) => FailureKind::Auth,
            other => {
                let lower = other.to_string().to_lowercase();
                if lower.contains("404") || lower.contains("not found") {
                    FailureKind::ModelNotFound
                } else if lower.contains("api key") {
                    FailureKind::Auth
                } else {
                    FailureKind::Other
                }
            }
        }
    }

    pub fn user_message(&self, detail: &str) -> String {
        match self {
            FailureKind::ModelNotFound => format!(
                "Model not found. Try selecting a different model. Available models: {}",
                AVAILABLE_MODELS.join(", ")
            ),
            FailureKind::Auth => {
                "API key issue. Please check your GEMINI_API_KEY configuration.".to_string()
            }
            FailureKind::Other => format!("Error generating response: {}", detail),
        }
    }
}

/// A classified backend failure, ready for display.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ChatFailure {
    pub kind: FailureKind,
    /// User-facing text.
    pub message: String,
    /// Raw backend error text.
    pub detail: String,
}

impl From<&ProviderError> for ChatFailure {
    fn from(err: &ProviderError) -> Self {
        let kind = FailureKind::classify(err);
        let detail = err.to_string();
        ChatFailure { kind, message: kind.user_message(&detail), detail }
    }
}

// ── Webhook Dispatch ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    AlreadyProcessed {
        analysis_id: String,
        fingerprint: String,
    },
    Completed {
        analysis_id: String,
        fingerprint: String,
        response: String,
    },
    Failed {
        analysis_id: String,
        fingerprint: String,
        kind: FailureKind,
        message: String,
        error: String,
    },
}

impl DispatchOutcome {
    pub fn analysis_id(&self) -> &str {
        match self {
            DispatchOutcome::AlreadyProcessed { analysis_id, .. }
            | DispatchOutcome::Completed { analysis_id, .. }
            | DispatchOutcome::Failed { analysis_id, .. } => analysis_id,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            DispatchOutcome::AlreadyProcessed { fingerprint, .. }
            | DispatchOutcome::Completed { fingerprint, .. }
            | DispatchOutcome::Failed { fingerprint, .. } => fingerprint,
        }
    }
}

/// Run one webhook payload through the session. The backend is invoked at
/// most once per fingerprint per session.
pub async fn dispatch_webhook(
    session: &mut SessionContext,
    backend: &dyn ChatBackend,
    payload: &WebhookPayload,
) -> DispatchOutcome {
    let analysis_id = payload.resolved_id();
    let fingerprint = payload.fingerprint.clone();

    if !session.mark_processed(&fingerprint) {
        info!("[dispatch] Payload {} already processed (id={})", fingerprint, analysis_id);
        return DispatchOutcome::AlreadyProcessed { analysis_id, fingerprint };
    }

    let model = session.model().to_string();
    info!(
        "[dispatch] Analysis {} fp={} len={} → {} model={}",
        analysis_id,
        fingerprint,
        payload.text.len(),
        backend.name(),
        model
    );

    let request = ChatRequest {
        input: &payload.text,
        session_id: WEBHOOK_SESSION_ID,
        model: &model,
        history: session.history(),
    };
    let result = backend.complete(request).await;

    let (status, response, outcome) = match result {
        Ok(reply) => {
            session.push_exchange(&payload.text, &reply.content);
            let outcome = DispatchOutcome::Completed {
                analysis_id: analysis_id.clone(),
                fingerprint: fingerprint.clone(),
                response: reply.content.clone(),
            };
            (AnalysisStatus::Completed, reply.content, outcome)
        }
        Err(e) => {
            error!("[dispatch] Analysis {} failed: {}", analysis_id, e);
            let failure = ChatFailure::from(&e);
            let outcome = DispatchOutcome::Failed {
                analysis_id: analysis_id.clone(),
                fingerprint: fingerprint.clone(),
                kind: failure.kind,
                message: failure.message,
                error: failure.detail.clone(),
            };
            (AnalysisStatus::Error, format!("Error: {}", failure.detail), outcome)
        }
    };

    session.ledger.upsert(AnalysisRecord {
        id: analysis_id,
        created_at: Local::now(),
        prompt: payload.text.clone(),
        response,
        status,
        fingerprint,
        model,
    });

    outcome
}

// ── Typed Chat ─────────────────────────────────────────────────────────

/// Forward typed input to the backend with the shared history.
pub async fn ask(
    session: &mut SessionContext,
    backend: &dyn ChatBackend,
    input: &str,
) -> Result<String, ChatFailure> {
    let model = session.model().to_string();
    let request = ChatRequest {
        input,
        session_id: CHAT_SESSION_ID,
        model: &model,
        history: session.history(),
    };

    match backend.complete(request).await {
        Ok(reply) => {
            session.push_exchange(input, &reply.content);
            Ok(reply.content)
        }
        Err(e) => {
            warn!("[dispatch] Chat request failed: {}", e);
            Err(ChatFailure::from(&e))
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
