//! Web fetch tool — HTTP GET with HTML-to-text extraction.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use voxagent_core::async_bridge;

use super::base::{optional_i64, require_string, Tool};

const USER_AGENT: &str = concat!("voxagent/", env!("CARGO_PKG_VERSION"));

/// Max chars for fetched content.
const DEFAULT_MAX_CHARS: usize = 50_000;

// ─────────────────────────────────────────────
// WebFetchTool
// ─────────────────────────────────────────────

/// Fetches a URL and returns its text content.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(5))
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page URL and return its text content. HTML is converted to text; JSON is pretty-printed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "maxChars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)",
                    "minimum": 100
                }
            },
            "required": ["url"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let url = require_string(&params, "url")?;
        let max_chars = optional_i64(&params, "maxChars")
            .map(|n| n.max(100) as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Invalid URL: must start with http:// or https://");
        }

        debug!(url = %url, "fetching web page");

        let client = self.client.clone();
        let target = url.clone();
        let (status, content_type, body) = async_bridge::block_on(async move {
            let resp = client
                .get(&target)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("HTTP request failed: {e}"))?;
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = resp
                .text()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read response body: {e}"))?;
            anyhow::Ok((status, content_type, body))
        })?;

        let text = if content_type.contains("json") {
            match serde_json::from_str::<Value>(&body) {
                Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
                Err(_) => body,
            }
        } else if content_type.contains("html") || body.trim_start().starts_with('<') {
            strip_html_tags(&body)
        } else {
            body
        };

        let total = text.chars().count();
        let mut out = if total > max_chars {
            let cut: String = text.chars().take(max_chars).collect();
            format!("{cut}\n... (truncated, {total} chars total)")
        } else {
            text
        };
        if status >= 400 {
            out = format!("HTTP {status}\n{out}");
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// HTML helpers
// ─────────────────────────────────────────────

struct HtmlPatterns {
    hidden: Regex,
    breaks: Regex,
    tags: Regex,
    spaces: Regex,
    newlines: Regex,
}

fn patterns() -> Option<&'static HtmlPatterns> {
    static PATTERNS: OnceLock<Option<HtmlPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(HtmlPatterns {
                hidden: Regex::new(
                    r"(?is)<(script|style|noscript|head)\b.*?</(script|style|noscript|head)\s*>",
                )
                .ok()?,
                breaks: Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\b[^>]*>").ok()?,
                tags: Regex::new(r"(?s)<[^>]*>").ok()?,
                spaces: Regex::new(r"[ \t\r\f]+").ok()?,
                newlines: Regex::new(r"\n\s*\n+").ok()?,
            })
        })
        .as_ref()
}

/// Remove scripts, styles and tags, decode common entities, collapse whitespace.
pub fn strip_html_tags(html: &str) -> String {
    let Some(p) = patterns() else {
        return html.to_string();
    };
    let text = p.hidden.replace_all(html, "");
    let text = p.breaks.replace_all(&text, "\n");
    let text = p.tags.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = p.spaces.replace_all(&text, " ");
    let text = p.newlines.replace_all(&text, "\n");
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(url: &str) -> HashMap<String, Value> {
        HashMap::from([("url".to_string(), json!(url))])
    }

    #[test]
    fn test_strip_html_basic() {
        let text = strip_html_tags("<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>");
        assert_eq!(text, "Title\nHello world");
    }

    #[test]
    fn test_strip_html_script_and_style() {
        let html = "<style>body { color: red; }</style><p>Before</p><script>alert('x');</script><p>After</p>";
        let text = strip_html_tags(html);
        assert_eq!(text, "Before\nAfter");
    }

    #[test]
    fn test_strip_html_entities_and_breaks() {
        assert_eq!(strip_html_tags("A &amp; B &lt; C"), "A & B < C");
        assert_eq!(strip_html_tags("Line1<br>Line2<br/>Line3"), "Line1\nLine2\nLine3");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let tool = WebFetchTool::new(Duration::from_secs(5));
        assert!(tool.execute(params("file:///etc/passwd")).is_err());
    }

    #[test]
    fn test_fetch_html_page() {
        let server = async_bridge::block_on(MockServer::start());
        async_bridge::block_on(
            Mock::given(method("GET"))
                .and(path("/page"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw("<p>Recipe: <b>omelet</b></p>", "text/html"),
                )
                .mount(&server),
        );

        let tool = WebFetchTool::new(Duration::from_secs(5));
        let out = tool.execute(params(&format!("{}/page", server.uri()))).unwrap();
        assert_eq!(out, "Recipe: omelet");
    }

    #[test]
    fn test_fetch_json_and_status() {
        let server = async_bridge::block_on(MockServer::start());
        async_bridge::block_on(
            Mock::given(method("GET"))
                .and(path("/missing"))
                .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "gone"})))
                .mount(&server),
        );

        let tool = WebFetchTool::new(Duration::from_secs(5));
        let out = tool.execute(params(&format!("{}/missing", server.uri()))).unwrap();
        assert!(out.starts_with("HTTP 404"));
        assert!(out.contains("\"error\": \"gone\""));
    }
}
