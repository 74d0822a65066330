// Threatdesk — HTTP Front-End
//
// Raw `tokio::net::TcpListener` accept loop, one task per connection, no
// framework. Routes:
//   GET  /                     chat page; `?prompt=` triggers webhook intake
//   POST /chat                 typed chat (form field `message`)
//   POST /model                select model (form field `model`)
//   POST /history/clear        clear conversation history
//   POST /results/clear        clear ledger + processed fingerprints
//   GET  /results              results dashboard
//   GET  /results/{id}.json    export one record as a download
//   GET  /api/webhook?prompt=  machine intake, JSON outcome
//   GET  /api/results          JSON export of all records
//   GET  /health               liveness probe
//
// The session sits behind an async mutex that is held across the backend
// call, so dispatches are serialized.

use crate::config::ServerConfig;
use crate::page::{self, ChatPage, Notice, WebhookView};
use crate::request::{read_request, HttpRequest, HttpResponse};
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threatdesk_core::{
    ask, dispatch_webhook, ChatBackend, DispatchOutcome, EngineError, EngineResult, FailureKind, SessionContext, WebhookPayload,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

// ── Rate Limiter ───────────────────────────────────────────────────────

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Fixed one-minute window per client IP. Expired windows are dropped on
/// every check, so the map only holds clients seen in the last minute.
pub struct RateLimiter {
    windows: parking_lot::Mutex<HashMap<String, ClientWindow>>,
    limit: u32,
}

struct ClientWindow {
    started: Instant,
    hits: u32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        RateLimiter { windows: parking_lot::Mutex::new(HashMap::new()), limit }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    pub fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut windows = self.windows.lock();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < RATE_WINDOW);

        let window = windows
            .entry(ip.to_string())
            .or_insert(ClientWindow { started: now, hits: 0 });
        if window.hits >= self.limit {
            warn!("[server] Rate limit hit for {} ({} per minute)", ip, self.limit);
            return false;
        }
        window.hits += 1;
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

// ── Shared State ───────────────────────────────────────────────────────

pub struct AppState {
    pub config: ServerConfig,
    pub session: Mutex<SessionContext>,
    pub backend: Arc<dyn ChatBackend>,
    rate_limiter: RateLimiter,
    /// One-shot notices shown on the next page render (post/redirect/get).
    flash: parking_lot::Mutex<Vec<Notice>>,
    requests: AtomicU64,
}

impl AppState {
    pub fn new(config: ServerConfig, session: SessionContext, backend: Arc<dyn ChatBackend>) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);
        AppState {
            config,
            session: Mutex::new(session),
            backend,
            rate_limiter,
            flash: parking_lot::Mutex::new(Vec::new()),
            requests: AtomicU64::new(0),
        }
    }

    fn push_flash(&self, notice: Notice) {
        self.flash.lock().push(notice);
    }

    fn take_flash(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.flash.lock())
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

// ── Server Loop ────────────────────────────────────────────────────────

pub async fn run_server(state: Arc<AppState>) -> EngineResult<()> {
    let addr = state.config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Bind {} failed: {}", addr, e))?;
    info!("[server] Listening on http://{}", addr);

    loop {
        tokio::select! {
            accept = listener.accept() => match accept {
                Ok((mut stream, peer)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        let peer_ip = peer.ip().to_string();
                        if let Err(e) = handle_connection(&mut stream, &peer_ip, &state).await {
                            warn!("[server] Request error from {}: {}", peer_ip, e);
                        }
                    });
                }
                Err(e) => warn!("[server] Accept error: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("[server] Shutdown requested");
                break;
            }
        }
    }

    info!("[server] Stopped after {} request(s)", state.request_count());
    Ok(())
}

async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    peer_ip: &str,
    state: &AppState,
) -> EngineResult<()> {
    let limit = Duration::from_secs(state.config.request_timeout_secs);
    let request = match tokio::time::timeout(limit, read_request(stream)).await {
        Ok(Ok(Some(r))) => r,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            HttpResponse::text(400, &e.to_string()).write_to(stream).await?;
            return Err(e);
        }
        Err(_) => {
            HttpResponse::text(408, "Request timeout").write_to(stream).await?;
            return Err(EngineError::Other(format!(
                "No complete request within {}s",
                state.config.request_timeout_secs
            )));
        }
    };
    let response = route(state, &request, peer_ip).await;
    response.write_to(stream).await
}

// ── Routing ────────────────────────────────────────────────────────────

pub async fn route(state: &AppState, req: &HttpRequest, peer_ip: &str) -> HttpResponse {
    state.requests.fetch_add(1, Ordering::Relaxed);
    info!("[server] {} {} from {}", req.method, req.path, peer_ip);

    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/") => chat_page(state, req, peer_ip).await,
        ("POST", "/chat") => post_chat(state, req).await,
        ("POST", "/model") => post_model(state, req).await,
        ("POST", "/history/clear") => {
            state.session.lock().await.clear_history();
            HttpResponse::redirect("/")
        }
        ("POST", "/results/clear") => {
            state.session.lock().await.clear_results();
            state.push_flash(Notice::Info("Analysis results cleared.".into()));
            HttpResponse::redirect("/")
        }
        ("GET", "/results") => results_page(state).await,
        ("GET", "/api/webhook") => api_webhook(state, req, peer_ip).await,
        ("GET", "/api/results") => api_results(state).await,
        ("GET", "/health") => HttpResponse::json(200, &json!({ "ok": true })),
        ("GET", path) if path.starts_with("/results/") && path.ends_with(".json") => {
            export_record(state, path).await
        }
        (_, path) => HttpResponse::json(404, &json!({ "ok": false, "error": format!("Not found: {} {}", req.method, path) })),
    }
}

/// Result of looking for a webhook payload in a query string.
enum Intake {
    None,
    Malformed,
    Payload(WebhookPayload),
}

fn intake_from_query(query: &str) -> Intake {
    match WebhookPayload::from_query(query) {
        Ok(Some(payload)) => Intake::Payload(payload),
        Ok(None) => Intake::None,
        Err(_) => Intake::Malformed,
    }
}

async fn chat_page(state: &AppState, req: &HttpRequest, peer_ip: &str) -> HttpResponse {
    let mut notices = state.take_flash();
    let mut webhook: Option<(WebhookPayload, DispatchOutcome)> = None;

    let mut session = state.session.lock().await;
    match intake_from_query(&req.query) {
        Intake::None => {}
        Intake::Malformed => {
            warn!("[server] Ignoring undecodable webhook payload from {}", peer_ip);
            notices.push(Notice::Warning(
                "The webhook payload could not be decoded and was ignored.".into(),
            ));
        }
        Intake::Payload(payload) => {
            if state.rate_limiter.check(peer_ip) {
                let outcome = dispatch_webhook(&mut session, state.backend.as_ref(), &payload).await;
                webhook = Some((payload, outcome));
            } else {
                notices.push(Notice::Error("Rate limit exceeded — try again later.".into()));
            }
        }
    }

    if let Some((_, DispatchOutcome::Failed { kind: FailureKind::ModelNotFound, .. })) = &webhook {
        notices.push(Notice::Info("Try selecting a different model from the sidebar.".into()));
    }

    let html = page::render_chat_page(&ChatPage {
        title: &state.config.page_title,
        model: session.model(),
        history: session.history(),
        total_analyses: session.ledger.len(),
        webhook: webhook.as_ref().map(|(payload, outcome)| WebhookView { payload, outcome }),
        notices: &notices,
    });
    HttpResponse::html(html)
}

async fn post_chat(state: &AppState, req: &HttpRequest) -> HttpResponse {
    let Some(message) = req.form_value("message").filter(|m| !m.trim().is_empty()) else {
        state.push_flash(Notice::Warning("Type a question first.".into()));
        return HttpResponse::redirect("/");
    };

    let mut session = state.session.lock().await;
    if let Err(failure) = ask(&mut session, state.backend.as_ref(), message.trim()).await {
        state.push_flash(Notice::Error(failure.message));
        state.push_flash(Notice::Info("Please check your API key and internet connection.".into()));
    }
    HttpResponse::redirect("/")
}

async fn post_model(state: &AppState, req: &HttpRequest) -> HttpResponse {
    let model = req.form_value("model").unwrap_or_default();
    if let Err(e) = state.session.lock().await.set_model(&model) {
        state.push_flash(Notice::Error(e.to_string()));
    }
    HttpResponse::redirect("/")
}

async fn results_page(state: &AppState) -> HttpResponse {
    let session = state.session.lock().await;
    let records = session.ledger.list();
    HttpResponse::html(page::render_results_page(&state.config.page_title, &records))
}

async fn export_record(state: &AppState, path: &str) -> HttpResponse {
    let encoded = &path["/results/".len()..path.len() - ".json".len()];
    let Ok(id) = urlencoding::decode(encoded) else {
        return HttpResponse::json(400, &json!({ "ok": false, "error": "Invalid analysis id" }));
    };

    let session = state.session.lock().await;
    match session.ledger.get(&id) {
        Some(record) => match serde_json::to_value(record.export()) {
            Ok(value) => HttpResponse::json(200, &value).attachment(&format!("analysis_{}.json", id)),
            Err(e) => {
                error!("[server] Export of {} failed: {}", id, e);
                HttpResponse::json(500, &json!({ "ok": false, "error": e.to_string() }))
            }
        },
        None => HttpResponse::json(404, &json!({ "ok": false, "error": format!("No analysis {}", id) })),
    }
}

async fn api_webhook(state: &AppState, req: &HttpRequest, peer_ip: &str) -> HttpResponse {
    if !state.rate_limiter.check(peer_ip) {
        return HttpResponse::json(429, &json!({ "ok": false, "error": "Rate limit exceeded — try again later" }));
    }
    let payload = match intake_from_query(&req.query) {
        Intake::Payload(p) => p,
        Intake::None => {
            return HttpResponse::json(400, &json!({ "ok": false, "error": "Missing prompt parameter" }))
        }
        Intake::Malformed => {
            return HttpResponse::json(400, &json!({ "ok": false, "error": "Undecodable prompt parameter" }))
        }
    };

    let mut session = state.session.lock().await;
    let outcome = dispatch_webhook(&mut session, state.backend.as_ref(), &payload).await;
    let ok = !matches!(outcome, DispatchOutcome::Failed { .. });
    HttpResponse::json(200, &json!({ "ok": ok, "result": outcome }))
}

async fn api_results(state: &AppState) -> HttpResponse {
    let session = state.session.lock().await;
    let records: Vec<_> = session
        .ledger
        .list()
        .into_iter()
        .map(|r| json!({ "analysis_id": r.id, "fingerprint": r.fingerprint, "record": r.export() }))
        .collect();
    HttpResponse::json(200, &json!(records))
}

// ── Tests ──────────────────────────────────────────────────────────────
