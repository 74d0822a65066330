// Threatdesk Engine — Session Context
//
// Everything one logical session owns: the results ledger, the set of
// processed payload fingerprints, the conversation history and the selected
// model. Callers create one and pass it by `&mut` into dispatch; there is no
// ambient global state. Lifetime = the hosting process.

use crate::atoms::constants::{AVAILABLE_MODELS, DEFAULT_MODEL};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatMessage;
use crate::engine::ledger::Ledger;
use log::info;
use std::collections::HashSet;

#[derive(Debug)]
pub struct SessionContext {
    pub ledger: Ledger,
    processed: HashSet<String>,
    history: Vec<ChatMessage>,
    model: String,
}

impl Default for SessionContext {
    fn default() -> Self {
        SessionContext {
            ledger: Ledger::new(),
            processed: HashSet::new(),
            history: Vec::new(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl SessionContext {
    /// New session using `model`, which must be one of `AVAILABLE_MODELS`.
    pub fn new(model: &str) -> EngineResult<Self> {
        let mut session = Self::default();
        session.set_model(model)?;
        Ok(session)
    }

    // ── Fingerprints ───────────────────────────────────────────────────

    pub fn is_processed(&self, fingerprint: &str) -> bool {
        self.processed.contains(fingerprint)
    }

    /// Record `fingerprint` as handled. Returns false if it already was.
    pub fn mark_processed(&mut self, fingerprint: &str) -> bool {
        self.processed.insert(fingerprint.to_string())
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Empty the ledger and forget every processed fingerprint.
    pub fn clear_results(&mut self) {
        self.ledger.clear();
        self.processed.clear();
        info!("[session] Results and processed fingerprints cleared");
    }

    // ── Conversation ───────────────────────────────────────────────────

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn push_exchange(&mut self, input: &str, reply: &str) {
        self.history.push(ChatMessage::user(input));
        self.history.push(ChatMessage::assistant(reply));
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        info!("[session] Chat history cleared");
    }

    // ── Model ──────────────────────────────────────────────────────────

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) -> EngineResult<()> {
        if !AVAILABLE_MODELS.contains(&model) {
            return Err(EngineError::Config(format!(
                "Unknown model '{}' (available: {})",
                model,
                AVAILABLE_MODELS.join(", ")
            )));
        }
        if self.model != model {
            info!("[session] Model {} → {}", self.model, model);
            self.model = model.to_string();
        }
        Ok(())
    }
}
