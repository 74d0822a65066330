// Threatdesk Engine — Chat Backends
// Every backend implements atoms::traits::ChatBackend; the dispatcher only
// ever holds `&dyn ChatBackend`.

pub mod gemini;

pub use gemini::GeminiBackend;
