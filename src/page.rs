// Threatdesk — HTML page builders
//
// Server-rendered pages: the chat page (sidebar, webhook status, history,
// input) and the results dashboard. All user and model text is escaped.

use htmlescape::encode_minimal;
use threatdesk_core::atoms::constants::{AVAILABLE_MODELS, QUICK_QUESTIONS};
use threatdesk_core::{AnalysisRecord, AnalysisStatus, ChatMessage, DispatchOutcome, Role, WebhookPayload};

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
}

impl Notice {
    fn css_class(&self) -> &'static str {
        match self {
            Notice::Info(_) => "notice info",
            Notice::Success(_) => "notice success",
            Notice::Warning(_) => "notice warning",
            Notice::Error(_) => "notice error",
        }
    }

    fn text(&self) -> &str {
        match self {
            Notice::Info(t) | Notice::Success(t) | Notice::Warning(t) | Notice::Error(t) => t,
        }
    }
}

pub struct WebhookView<'a> {
    pub payload: &'a WebhookPayload,
    pub outcome: &'a DispatchOutcome,
}

pub struct ChatPage<'a> {
    pub title: &'a str,
    pub model: &'a str,
    pub history: &'a [ChatMessage],
    pub total_analyses: usize,
    pub webhook: Option<WebhookView<'a>>,
    pub notices: &'a [Notice],
}

const STYLE: &str = r#"
*{margin:0;padding:0;box-sizing:border-box}
body{font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;background:#f0fdfa;color:#134e4a;display:flex;min-height:100vh}
a{color:#0f766e}
.sidebar{width:300px;background:#ccfbf1;padding:16px;border-right:1px solid #99f6e4;display:flex;flex-direction:column;gap:10px}
.sidebar h3{color:#0f766e;font-size:15px;margin-top:8px}
.sidebar button,.sidebar select{width:100%;padding:8px;border-radius:6px;border:1px solid #5eead4;background:#fff;color:#134e4a;cursor:pointer;text-align:left}
.sidebar code{display:block;background:#fff;padding:6px;border-radius:4px}
.main{flex:1;padding:20px;display:flex;flex-direction:column;gap:12px;max-width:1100px}
.main-header{background:linear-gradient(90deg,#0d9488,#14b8a6);padding:1rem;border-radius:10px;box-shadow:0 2px 4px rgba(0,0,0,.1)}
.main-header h1{color:#fff;text-align:center;font-weight:600;font-size:22px}
.subtitle{color:#0f766e;text-align:center;font-style:italic}
.notice{padding:1rem;border-radius:8px;border-left:4px solid}
.notice.info{background:#e0f2fe;border-color:#0284c7}
.notice.success{background:#f0fdf4;border-color:#22c55e}
.notice.warning{background:#fef3c7;border-color:#f59e0b}
.notice.error{background:#fef2f2;border-color:#ef4444}
.msg{padding:10px 14px;border-radius:12px;line-height:1.5;white-space:pre-wrap;word-wrap:break-word}
.msg.user{background:#fff;border:1px solid #99f6e4;align-self:flex-end;max-width:80%}
.msg.assistant{background:#f0fdf4;border:1px solid #bbf7d0;align-self:flex-start;max-width:90%}
.msg .role{font-weight:600;font-size:12px;color:#0f766e;display:block;margin-bottom:4px}
pre.payload{background:#fff;border:1px solid #99f6e4;padding:10px;border-radius:6px;white-space:pre-wrap;max-height:300px;overflow:auto}
.welcome{background:linear-gradient(135deg,#e6fffa 0%,#f0fdfa 100%);padding:2rem;border-radius:15px;border:2px solid #a7f3d0}
.welcome ul{padding-left:1.5rem;margin:8px 0}
form.chat{display:flex;gap:8px}
form.chat textarea{flex:1;padding:10px;border-radius:8px;border:1px solid #5eead4;font-family:inherit;min-height:60px}
form.chat button{padding:10px 20px;background:#0d9488;color:#fff;border:none;border-radius:8px;font-weight:600;cursor:pointer}
form.chat button:disabled,form.chat textarea:disabled{opacity:.5;cursor:not-allowed}
details{background:#fff;border:1px solid #99f6e4;border-radius:8px;padding:10px}
details summary{cursor:pointer;font-weight:600}
details .body{margin-top:8px;display:flex;flex-direction:column;gap:6px}
.status-completed{color:#15803d}.status-error{color:#b91c1c}
"#;

fn page_shell(title: &str, sidebar: &str, main: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\n\
         <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
         <aside class=\"sidebar\">{sidebar}</aside>\n<main class=\"main\">{main}</main>\n</body>\n</html>",
        title = encode_minimal(title),
        style = STYLE,
        sidebar = sidebar,
        main = main,
    )
}

fn header(title: &str) -> String {
    format!(
        "<div class=\"main-header\"><h1>🛡 {}</h1></div>\
         <p class=\"subtitle\">Automated log analysis with predictive and prescriptive insights</p>",
        encode_minimal(title)
    )
}

fn notice_html(notice: &Notice) -> String {
    format!("<div class=\"{}\">{}</div>", notice.css_class(), encode_minimal(notice.text()))
}

// ── Chat Page ──────────────────────────────────────────────────────────

pub fn render_chat_page(page: &ChatPage<'_>) -> String {
    page_shell(page.title, &render_sidebar(page), &render_chat_main(page))
}

fn render_sidebar(page: &ChatPage<'_>) -> String {
    let mut html = String::new();

    html.push_str("<h3>🎛 Model Settings</h3><form method=\"post\" action=\"/model\">");
    html.push_str("<select name=\"model\" onchange=\"this.form.submit()\">");
    for model in AVAILABLE_MODELS {
        let selected = if model == page.model { " selected" } else { "" };
        html.push_str(&format!("<option value=\"{0}\"{1}>{0}</option>", encode_minimal(model), selected));
    }
    html.push_str("</select><noscript><button type=\"submit\">Apply</button></noscript></form>");

    html.push_str("<h3>⚙ Options</h3>");
    html.push_str("<form method=\"post\" action=\"/history/clear\"><button type=\"submit\">🗑 Clear Chat History</button></form>");

    if page.total_analyses > 0 {
        html.push_str("<h3>📊 Analysis Results</h3>");
        html.push_str(&format!("<div>Total analyses: {}</div>", page.total_analyses));
        html.push_str("<a href=\"/results\"><button type=\"button\">📋 View All Results</button></a>");
        html.push_str("<form method=\"post\" action=\"/results/clear\"><button type=\"submit\">🧹 Clear Results</button></form>");
    }

    html.push_str("<h3>🔗 Webhook Status</h3>");
    match &page.webhook {
        Some(view) => {
            html.push_str("<div>✅ Webhook request active</div>");
            html.push_str(&format!(
                "<div>Analyzing {} characters of log data</div>",
                view.payload.text.chars().count()
            ));
            if let Some(id) = &view.payload.analysis_id {
                html.push_str(&format!("<code>ID: {}</code>", encode_minimal(id)));
            }
        }
        None => html.push_str("<div>⏳ Waiting for webhook requests</div>"),
    }

    html.push_str("<h3>💡 Quick Questions</h3>");
    for question in QUICK_QUESTIONS {
        html.push_str(&format!(
            "<form method=\"post\" action=\"/chat\"><input type=\"hidden\" name=\"message\" value=\"{}\">\
             <button type=\"submit\"{}>❓ {}</button></form>",
            encode_minimal(question),
            if page.webhook.is_some() { " disabled" } else { "" },
            encode_minimal(question)
        ));
    }
    html
}

fn render_chat_main(page: &ChatPage<'_>) -> String {
    let mut html = header(page.title);

    for notice in page.notices {
        html.push_str(&notice_html(notice));
    }

    if let Some(view) = &page.webhook {
        html.push_str(&render_webhook(view));
    }

    for message in page.history {
        html.push_str(&render_message(message));
    }

    if page.history.is_empty() && page.webhook.is_none() {
        html.push_str(WELCOME);
    }

    if page.webhook.is_some() {
        html.push_str(
            "<form class=\"chat\"><textarea disabled placeholder=\"Webhook request is being processed...\"></textarea>\
             <button disabled>Send</button></form>",
        );
    } else {
        html.push_str(
            "<form class=\"chat\" method=\"post\" action=\"/chat\">\
             <textarea name=\"message\" placeholder=\"Ask about insider threats or paste logs for analysis...\" required></textarea>\
             <button type=\"submit\">Send</button></form>",
        );
    }
    html
}

fn render_message(message: &ChatMessage) -> String {
    let (class, label) = match message.role {
        Role::User => ("user", "You"),
        Role::Assistant => ("assistant", "Assistant"),
        Role::System => ("assistant", "System"),
    };
    format!(
        "<div class=\"msg {}\"><span class=\"role\">{}</span>{}</div>",
        class,
        label,
        encode_minimal(&message.content)
    )
}

fn render_webhook(view: &WebhookView<'_>) -> String {
    let mut html = String::from(
        "<div class=\"notice warning\"><strong>🔗 Webhook Request Received</strong><br>Processing log analysis request...</div>",
    );

    html.push_str("<div class=\"msg user\"><span class=\"role\">🔗 Webhook Log Analysis Request</span>");
    if let Some(id) = &view.payload.analysis_id {
        html.push_str(&format!("<div><em>Analysis ID:</em> {}</div>", encode_minimal(id)));
    }
    html.push_str(&format!("<pre class=\"payload\">{}</pre></div>", encode_minimal(&view.payload.text)));

    let id_link = format!(
        "<a href=\"/results/{}.json\">analysis_{}.json</a>",
        encode_minimal(&urlencoding::encode(view.outcome.analysis_id())),
        encode_minimal(view.outcome.analysis_id())
    );
    match view.outcome {
        DispatchOutcome::Completed { .. } => html.push_str(&format!(
            "<div class=\"notice success\"><strong>✅ Analysis Complete</strong><br>\
             Results have been stored and are available in the <a href=\"/results\">dashboard</a> ({}).</div>",
            id_link
        )),
        DispatchOutcome::AlreadyProcessed { fingerprint, .. } => html.push_str(&format!(
            "<div class=\"notice info\"><strong>ℹ Already processed</strong><br>\
             This payload (fingerprint <code>{}</code>) was handled earlier in this session. \
             See the <a href=\"/results\">dashboard</a> ({}).</div>",
            encode_minimal(fingerprint),
            id_link
        )),
        DispatchOutcome::Failed { message, error, .. } => html.push_str(&format!(
            "<div class=\"notice error\"><strong>❌ {}</strong><br><small>{}</small></div>",
            encode_minimal(message),
            encode_minimal(error)
        )),
    }
    html
}

const WELCOME: &str = r#"<div class="welcome">
<h2>👋 Welcome to the Log Analysis Chatbot!</h2>
<p><strong>I can help you with:</strong></p>
<ul>
<li>🔍 <strong>Predictive Analysis:</strong> identify patterns and predict potential security incidents</li>
<li>📋 <strong>Prescriptive Analysis:</strong> actionable recommendations and response procedures</li>
<li>🛡 Detecting behavioral indicators of insider threats</li>
<li>📊 Analyzing log data delivered through the webhook (<code>/?prompt=...</code>)</li>
<li>🔎 Investigating suspicious activities and anomalies</li>
</ul>
<p><strong>Ask a question, use a quick question, or send logs via webhook!</strong></p>
</div>"#;

// ── Results Dashboard ──────────────────────────────────────────────────

pub fn render_results_page(title: &str, records: &[&AnalysisRecord]) -> String {
    let sidebar = format!(
        "<h3>📊 Analysis Results</h3><div>Total analyses: {}</div>\
         <a href=\"/\"><button type=\"button\">← Back to Chat</button></a>\
         <form method=\"post\" action=\"/results/clear\"><button type=\"submit\">🧹 Clear Results</button></form>",
        records.len()
    );

    let mut main = header(title);
    main.push_str("<h2>📊 Analysis Results Dashboard</h2>");
    if records.is_empty() {
        main.push_str(&notice_html(&Notice::Info("No analysis results available yet.".into())));
    }
    for record in records {
        main.push_str(&render_record(record));
    }
    page_shell(title, &sidebar, &main)
}

fn render_record(record: &AnalysisRecord) -> String {
    let status_class = match record.status {
        AnalysisStatus::Completed => "status-completed",
        AnalysisStatus::Error => "status-error",
    };
    format!(
        "<details><summary>Analysis {id} - {ts}</summary><div class=\"body\">\
         <div><em>Status:</em> <span class=\"{status_class}\">{status}</span> · <em>Model:</em> {model} · <em>Fingerprint:</em> <code>{fp}</code></div>\
         <div><em>Log preview:</em></div><pre class=\"payload\">{preview}</pre>\
         <div><em>Response:</em></div><div class=\"msg assistant\">{response}</div>\
         <a href=\"/results/{href}.json\" download=\"analysis_{file}.json\">📥 Download Analysis</a>\
         </div></details>",
        id = encode_minimal(&record.id),
        ts = record.timestamp(),
        status_class = status_class,
        status = record.status,
        model = encode_minimal(&record.model),
        fp = encode_minimal(&record.fingerprint),
        preview = encode_minimal(&record.log_preview()),
        response = encode_minimal(&record.response),
        href = encode_minimal(&urlencoding::encode(&record.id)),
        file = encode_minimal(&record.id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn page<'a>(history: &'a [ChatMessage], webhook: Option<WebhookView<'a>>, notices: &'a [Notice]) -> String {
        render_chat_page(&ChatPage {
            title: "Test Title",
            model: "gemini-1.5-pro",
            history,
            total_analyses: 0,
            webhook,
            notices,
        })
    }

    #[test]
    fn test_welcome_when_empty() {
        let html = page(&[], None, &[]);
        assert!(html.contains("Welcome to the Log Analysis Chatbot"));
        assert!(html.contains("Waiting for webhook requests"));
        assert!(html.contains("<option value=\"gemini-1.5-pro\" selected>"));
        assert!(html.contains("action=\"/chat\""));
    }

    #[test]
    fn test_history_is_escaped() {
        let history = vec![ChatMessage::user("<script>alert(1)</script>"), ChatMessage::assistant("a & b")];
        let html = page(&history, None, &[]);
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a &amp; b"));
        assert!(!html.contains("Welcome to the Log Analysis Chatbot"));
    }

    #[test]
    fn test_webhook_view_disables_input() {
        let payload = WebhookPayload::new("Analysis ID: A1 — failed logins spike");
        let outcome = DispatchOutcome::Completed {
            analysis_id: "A1".into(),
            fingerprint: payload.fingerprint.clone(),
            response: "done".into(),
        };
        let html = page(&[], Some(WebhookView { payload: &payload, outcome: &outcome }), &[]);
        assert!(html.contains("Webhook request active"));
        assert!(html.contains("ID: A1"));
        assert!(html.contains("Analysis Complete"));
        assert!(html.contains("Webhook request is being processed..."));
        assert!(html.contains("/results/A1.json"));
        assert!(!html.contains("Welcome to the Log Analysis Chatbot"));
    }

    #[test]
    fn test_already_processed_notice() {
        let payload = WebhookPayload::new("user=bob");
        let outcome = DispatchOutcome::AlreadyProcessed {
            analysis_id: payload.resolved_id(),
            fingerprint: payload.fingerprint.clone(),
        };
        let html = page(&[], Some(WebhookView { payload: &payload, outcome: &outcome }), &[]);
        assert!(html.contains("Already processed"));
        assert!(html.contains(&payload.fingerprint));
    }

    #[test]
    fn test_notices_render() {
        let notices = vec![Notice::Error("API key issue".into())];
        let html = page(&[], None, &notices);
        assert!(html.contains("<div class=\"notice error\">API key issue</div>"));
    }

    #[test]
    fn test_results_page() {
        let record = AnalysisRecord {
            id: "A<1>".into(),
            created_at: Local::now(),
            prompt: "logs".into(),
            response: "Error: boom".into(),
            status: AnalysisStatus::Error,
            fingerprint: "deadbeef".into(),
            model: "gemini-1.5-flash".into(),
        };
        let html = render_results_page("T", &[&record]);
        assert!(html.contains("Analysis A&lt;1&gt; - "));
        assert!(html.contains("status-error"));
        assert!(html.contains("/results/A%3C1%3E.json"));

        let empty = render_results_page("T", &[]);
        assert!(empty.contains("No analysis results available yet."));
    }
}
