// Threatdesk Engine — Google Gemini Backend
// Implements ChatBackend over `models/{model}:streamGenerateContent?alt=sse`.
// The streamed text parts are concatenated into one reply.

use crate::atoms::constants::SYSTEM_PROMPT;
use crate::atoms::traits::{ChatBackend, ChatReply, ChatRequest, ProviderError};
use crate::atoms::types::{ChatMessage, ProviderConfig, Role};
use crate::engine::http::{build_client, is_retryable_status, parse_retry_after, CircuitBreaker, RetryPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    temperature: f64,
    system_prompt: String,
    retry: RetryPolicy,
    circuit: CircuitBreaker,
}

impl GeminiBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        GeminiBackend {
            client: build_client(Duration::from_secs(10), Duration::from_secs(120)),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            system_prompt: SYSTEM_PROMPT.to_string(),
            retry: RetryPolicy::default(),
            circuit: CircuitBreaker::new(5, Duration::from_secs(60)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.circuit = CircuitBreaker::new(threshold, cooldown);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Build `systemInstruction` and `contents`. Gemini wants strictly
    /// alternating user/model turns, so consecutive same-role entries merge.
    fn format_contents(system: &str, history: &[ChatMessage], input: &str) -> (Option<Value>, Vec<Value>) {
        let mut system_texts: Vec<&str> = Vec::new();
        if !system.is_empty() {
            system_texts.push(system);
        }

        let mut contents: Vec<Value> = Vec::new();
        let turns = history.iter().map(|m| (m.role, m.content.as_str()));
        for (role, text) in turns.chain(std::iter::once((Role::User, input))) {
            let role = match role {
                Role::System => {
                    system_texts.push(text);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "model",
            };
            let same_role = contents.last().and_then(|c| c["role"].as_str()) == Some(role);
            if same_role {
                if let Some(parts) = contents.last_mut().and_then(|c| c["parts"].as_array_mut()) {
                    parts.push(json!({"text": text}));
                }
            } else {
                contents.push(json!({"role": role, "parts": [{"text": text}]}));
            }
        }

        let system_instruction = (!system_texts.is_empty())
            .then(|| json!({"parts": [{"text": system_texts.join("\n\n")}]}));
        (system_instruction, contents)
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let (system_instruction, contents) =
            Self::format_contents(&self.system_prompt, request.history, request.input);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {"temperature": self.temperature},
        });
        if let Some(sys) = system_instruction {
            body["systemInstruction"] = sys;
        }
        body
    }

    async fn complete_inner(&self, request: ChatRequest<'_>) -> Result<ChatReply, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Auth("No API key configured".into()));
        }
        self.circuit.check().map_err(ProviderError::Transport)?;

        // Key travels in a header so it never shows up in URL-bearing errors.
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, request.model);
        let body = self.request_body(&request);
        info!(
            "[gemini] Request model={} session={} history={}",
            request.model,
            request.session_id,
            request.history.len()
        );

        let mut last_error = ProviderError::Transport("no attempt made".into());
        let mut retry_after: Option<u64> = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.wait(attempt - 1, retry_after.take()).await;
                warn!("[gemini] Retry {}/{} after {}ms", attempt, self.retry.max_retries, delay.as_millis());
            }

            let response = match self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.circuit.record_failure();
                    last_error = ProviderError::Transport(format!("HTTP request failed: {}", e.without_url()));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                error!("[gemini] API error {}: {}", status, truncate(&body_text, 500));

                last_error = classify_status(status, &api_error_message(&body_text), retry_after);
                if is_retryable_status(status) {
                    self.circuit.record_failure();
                    continue;
                }
                // The API answered; a bad key or unknown model is not an outage.
                self.circuit.record_success();
                return Err(last_error);
            }

            let mut acc = StreamAccumulator::default();
            let mut byte_stream = response.bytes_stream();
            // Split on raw bytes so multi-byte characters survive chunk edges.
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(|e| {
                    self.circuit.record_failure();
                    ProviderError::Transport(format!("Stream read error: {}", e.without_url()))
                })?;
                buffer.extend_from_slice(&bytes);
                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    acc.push_line(String::from_utf8_lossy(&line).trim());
                }
            }
            acc.push_line(String::from_utf8_lossy(&buffer).trim());

            self.circuit.record_success();
            return acc.finish();
        }

        Err(last_error)
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatReply, ProviderError> {
        self.complete_inner(request).await
    }
}

// ── Response handling ──────────────────────────────────────────────────

/// Collects text from SSE `data:` lines.
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    model: Option<String>,
    block_reason: Option<String>,
}

impl StreamAccumulator {
    fn push_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else { return };
        let v: Value = match serde_json::from_str(data.trim()) {
            Ok(v) => v,
            Err(e) => {
                debug!("[gemini] Skipping unparsable SSE line: {}", e);
                return;
            }
        };

        if let Some(model) = v["modelVersion"].as_str() {
            self.model = Some(model.to_string());
        }

        for candidate in v["candidates"].as_array().into_iter().flatten() {
            let finish_reason = candidate["finishReason"].as_str();
            let parts = candidate["content"]["parts"].as_array();
            if parts.is_none() {
                if let Some(reason) = finish_reason.filter(|r| *r != "STOP") {
                    warn!("[gemini] Empty candidate with finishReason={}", reason);
                    self.block_reason = Some(reason.to_string());
                }
                continue;
            }
            for part in parts.into_iter().flatten() {
                if part["thought"].as_bool().unwrap_or(false) {
                    continue;
                }
                if let Some(text) = part["text"].as_str() {
                    self.text.push_str(text);
                }
            }
        }
    }

    fn finish(self) -> Result<ChatReply, ProviderError> {
        if !self.text.is_empty() {
            return Ok(ChatReply { content: self.text, model: self.model });
        }
        let reason = self.block_reason.unwrap_or_else(|| "EMPTY".into());
        let msg = match reason.as_str() {
            "SAFETY" => "The response was blocked by Google's safety filter. Try rephrasing the request.".to_string(),
            "RECITATION" => "The response was blocked by a recitation filter. Try rephrasing.".to_string(),
            "MAX_TOKENS" => "The model ran out of output tokens. Try a shorter payload.".to_string(),
            "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => format!("Response blocked ({}). Try rephrasing the request.", reason),
            other => format!("The model returned an empty response (reason: {}).", other),
        };
        Err(ProviderError::Blocked(msg))
    }
}

/// Pull `error.message` out of a Google error body, falling back to raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate(body, 200).to_string())
}

fn classify_status(status: u16, message: &str, retry_after_secs: Option<u64>) -> ProviderError {
    let message = message.to_string();
    match status {
        401 | 403 => ProviderError::Auth(message),
        404 => ProviderError::ModelNotFound(message),
        400 if message.to_lowercase().contains("api key") => ProviderError::Auth(message),
        429 => ProviderError::RateLimited { message, retry_after_secs },
        _ => ProviderError::Api { status, message },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_format_contents_roles_and_system() {
        let history = vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")];
        let (sys, contents) = GeminiBackend::format_contents("be precise", &history, "q2");
        assert_eq!(sys.unwrap()["parts"][0]["text"], "be precise");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "q2");
    }

    #[test]
    fn test_format_contents_merges_consecutive_user_turns() {
        let history = vec![ChatMessage::user("orphan question")];
        let (_, contents) = GeminiBackend::format_contents("", &history, "next");
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_format_contents_history_system_joins_instruction() {
        let history = vec![ChatMessage::system("extra rule")];
        let (sys, contents) = GeminiBackend::format_contents("base", &history, "hi");
        assert_eq!(sys.unwrap()["parts"][0]["text"], "base\n\nextra rule");
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn test_accumulator_concatenates_and_skips_thoughts() {
        let mut acc = StreamAccumulator::default();
        acc.push_line(r#"data: {"candidates":[{"content":{"parts":[{"text":"Pred","thought":false}]}}],"modelVersion":"gemini-1.5-flash-002"}"#);
        acc.push_line(r#"data: {"candidates":[{"content":{"parts":[{"text":"hidden","thought":true},{"text":"ictive"}]},"finishReason":"STOP"}]}"#);
        acc.push_line("");
        acc.push_line(": keep-alive");
        let reply = acc.finish().unwrap();
        assert_eq!(reply.content, "Predictive");
        assert_eq!(reply.model.as_deref(), Some("gemini-1.5-flash-002"));
    }

    #[test]
    fn test_accumulator_blocked() {
        let mut acc = StreamAccumulator::default();
        acc.push_line(r#"data: {"candidates":[{"finishReason":"SAFETY"}]}"#);
        match acc.finish() {
            Err(ProviderError::Blocked(msg)) => assert!(msg.contains("safety filter")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(403, "denied", None), ProviderError::Auth(_)));
        assert!(matches!(classify_status(404, "models/x is not found", None), ProviderError::ModelNotFound(_)));
        assert!(matches!(classify_status(400, "API key not valid. Please pass a valid API key.", None), ProviderError::Auth(_)));
        assert!(matches!(classify_status(400, "bad request", None), ProviderError::Api { status: 400, .. }));
        assert!(matches!(
            classify_status(429, "slow down", Some(7)),
            ProviderError::RateLimited { retry_after_secs: Some(7), .. }
        ));
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message("plain text"), "plain text");
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("ééé", 2), "éé");
        assert_eq!(truncate("ab", 5), "ab");
    }

    /// Serve one canned HTTP response on an ephemeral port; returns the base URL.
    async fn serve_once(status_line: &'static str, content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| l.to_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + len {
                        break;
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );
            stream.write_all(resp.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn backend_for(base_url: String) -> GeminiBackend {
        let config = ProviderConfig {
            api_key: "test-key".into(),
            base_url: Some(base_url),
            ..Default::default()
        };
        GeminiBackend::new(&config).with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_complete_streams_reply() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Risk: \"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"high\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        )
        .to_string();
        let base = serve_once("200 OK", "text/event-stream", body).await;
        let backend = backend_for(base);

        let reply = backend
            .complete(ChatRequest { input: "logs", session_id: "webhook_session", model: "gemini-1.5-flash", history: &[] })
            .await
            .unwrap();
        assert_eq!(reply.content, "Risk: high");
    }

    #[tokio::test]
    async fn test_complete_maps_404_to_model_not_found() {
        let body = r#"{"error":{"code":404,"message":"models/gemini-1.0-pro is not found for API version v1beta","status":"NOT_FOUND"}}"#.to_string();
        let base = serve_once("404 Not Found", "application/json", body).await;
        let backend = backend_for(base);

        let err = backend
            .complete(ChatRequest { input: "logs", session_id: "default", model: "gemini-1.0-pro", history: &[] })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(ref m) if m.contains("is not found")));
    }

    #[tokio::test]
    async fn test_rejected_model_does_not_open_breaker() {
        let body = r#"{"error":{"code":404,"message":"models/nope is not found","status":"NOT_FOUND"}}"#.to_string();
        let base = serve_once("404 Not Found", "application/json", body).await;
        let backend = backend_for(base).with_circuit_breaker(1, Duration::from_secs(60));

        let err = backend
            .complete(ChatRequest { input: "logs", session_id: "webhook_session", model: "nope", history: &[] })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(_)));
        assert!(!backend.circuit.is_open());
        assert!(backend.circuit.check().is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_upstream_opens_breaker() {
        let base = serve_once("503 Service Unavailable", "application/json", "{}".to_string()).await;
        let backend = backend_for(base).with_circuit_breaker(1, Duration::from_secs(60));

        let err = backend
            .complete(ChatRequest { input: "logs", session_id: "default", model: "gemini-1.5-flash", history: &[] })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 503, .. }));
        assert!(backend.circuit.is_open());

        let refused = backend
            .complete(ChatRequest { input: "again", session_id: "default", model: "gemini-1.5-flash", history: &[] })
            .await
            .unwrap_err();
        assert!(matches!(refused, ProviderError::Transport(ref m) if m.contains("consecutive failures")));
    }

    #[tokio::test]
    async fn test_complete_without_key_is_auth_error() {
        let backend = GeminiBackend::new(&ProviderConfig::default());
        let err = backend
            .complete(ChatRequest { input: "x", session_id: "default", model: "gemini-1.5-flash", history: &[] })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
