// Threatdesk — Minimal HTTP/1.1 request reading and response writing
//
// One request per connection, `Connection: close` on every response.
// Bodies are read up to Content-Length and capped at MAX_REQUEST_BYTES.

use std::collections::HashMap;
use threatdesk_core::{EngineError, EngineResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_REQUEST_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`, still percent-encoded.
    pub query: String,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(target: &str) -> Self {
        Self::new("GET", target, Vec::new())
    }

    pub fn post_form(target: &str, body: &str) -> Self {
        let mut req = Self::new("POST", target, body.as_bytes().to_vec());
        req.headers.insert("content-type".into(), "application/x-www-form-urlencoded".into());
        req
    }

    fn new(method: &str, target: &str, body: Vec<u8>) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: query.to_string(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Decoded value of an `application/x-www-form-urlencoded` body field.
    pub fn form_value(&self, key: &str) -> Option<String> {
        let body = String::from_utf8_lossy(&self.body);
        form_value(&body, key)
    }
}

/// Look up one field of a urlencoded string (`+` means space).
pub fn form_value(encoded: &str, key: &str) -> Option<String> {
    encoded.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k != key {
            return None;
        }
        urlencoding::decode(&v.replace('+', " ")).ok().map(|s| s.into_owned())
    })
}

/// Read one request. `Ok(None)` when the peer closed without sending anything.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> EngineResult<Option<HttpRequest>> {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(EngineError::Other("Request headers too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(EngineError::Other("Connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(EngineError::Other(format!("Malformed request line: {}", request_line)));
    }

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(EngineError::Other(format!("Request body too large ({} bytes)", content_length)));
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    let mut request = HttpRequest::new(parts[0], parts[1], body);
    request.headers = headers;
    Ok(Some(request))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Responses ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub extra_headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn html(body: String) -> Self {
        Self::with_body(200, "text/html; charset=utf-8", body.into_bytes())
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::with_body(status, "application/json", value.to_string().into_bytes())
    }

    pub fn redirect(location: &str) -> Self {
        let mut resp = Self::with_body(303, "text/plain; charset=utf-8", Vec::new());
        resp.extra_headers.push(("Location", location.to_string()));
        resp
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::with_body(status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
    }

    pub fn attachment(mut self, filename: &str) -> Self {
        self.extra_headers
            .push(("Content-Disposition", format!("attachment; filename=\"{}\"", filename.replace('"', ""))));
        self
    }

    fn with_body(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        HttpResponse { status, content_type, extra_headers: Vec::new(), body }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub async fn write_to<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> EngineResult<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            status_text(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.extra_headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&self.body).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        303 => "See Other",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_get_with_query() {
        let mut data: &[u8] = b"GET /?prompt=hi+there HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = read_request(&mut data).await.unwrap().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/");
        assert_eq!(req.query, "prompt=hi+there");
        assert_eq!(req.headers.get("host").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_read_post_body() {
        let mut data: &[u8] =
            b"POST /chat HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 17\r\n\r\nmessage=hi+there&extra";
        let req = read_request(&mut data).await.unwrap().unwrap();
        assert_eq!(req.body, b"message=hi+there&");
        assert_eq!(req.form_value("message").as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn test_read_empty_connection() {
        let mut data: &[u8] = b"";
        assert!(read_request(&mut data).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_malformed() {
        let mut data: &[u8] = b"GARBAGE\r\n\r\n";
        assert!(read_request(&mut data).await.is_err());
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let raw = format!("POST /chat HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_REQUEST_BYTES + 1);
        let mut data: &[u8] = raw.as_bytes();
        assert!(read_request(&mut data).await.is_err());
    }

    #[test]
    fn test_form_value() {
        assert_eq!(form_value("model=gemini-1.5-pro&x=1", "model").as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(form_value("message=a%26b+c", "message").as_deref(), Some("a&b c"));
        assert_eq!(form_value("x=1", "model"), None);
    }

    #[tokio::test]
    async fn test_write_response() {
        let resp = HttpResponse::redirect("/results");
        let mut out: Vec<u8> = Vec::new();
        resp.write_to(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 303 See Other\r\n"));
        assert!(text.contains("Location: /results\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_attachment_header() {
        let resp = HttpResponse::json(200, &serde_json::json!({})).attachment("analysis_A1.json");
        assert_eq!(resp.header("content-disposition"), Some("attachment; filename=\"analysis_A1.json\""));
    }
}
