// Threatdesk Core
//
// Webhook intake and result ledger for a conversational log-analysis
// front-end. `atoms` holds pure types and the backend trait; `engine` holds
// intake, dispatch, session state and the Gemini backend.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::traits::{ChatBackend, ChatReply, ChatRequest, ProviderError};
pub use atoms::types::{AnalysisRecord, AnalysisStatus, ChatMessage, ExportRecord, ProviderConfig, Role};
pub use engine::dispatch::{ask, dispatch_webhook, ChatFailure, DispatchOutcome, FailureKind};
pub use engine::intake::WebhookPayload;
pub use engine::ledger::Ledger;
pub use engine::session::SessionContext;
