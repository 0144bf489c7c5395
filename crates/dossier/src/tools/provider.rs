//! Read-only external tools: web search and page extraction.
//!
//! Both calls are read-only, so retrying after a timeout is always safe.
//! Results are returned raw; the direction loop archives and compresses them.
//!
//! | Call | [`WebToolProvider`] backend |
//! |------|-----------------------------|
//! | `search` | Brave Search API (`BRAVE_SEARCH_KEY`) |
//! | `extract` | HTTP GET, HTML reduced to text |

use scraper::{ElementRef, Html};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Boxed future returned by [`ToolProvider`] methods.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// External research tools available to a direction.
pub trait ToolProvider: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> ToolFuture<'a>;

    fn extract<'a>(&'a self, url: &'a str) -> ToolFuture<'a>;
}

/// Default number of search results requested.
pub const DEFAULT_SEARCH_COUNT: u32 = 10;

/// Brave Search plus plain HTTP extraction.
pub struct WebToolProvider {
    client: reqwest::Client,
    brave_key: Option<String>,
}

impl WebToolProvider {
    /// Build a provider. `brave_key` may be `None`, in which case every
    /// search fails with an explanatory error (extraction still works).
    pub fn new(brave_key: Option<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("dossier/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            brave_key,
        })
    }

    /// Read `BRAVE_SEARCH_KEY` from the environment.
    pub fn from_env(timeout: Duration) -> Result<Self, String> {
        Self::new(std::env::var("BRAVE_SEARCH_KEY").ok(), timeout)
    }

    async fn brave_search(&self, query: &str) -> Result<String, String> {
        let api_key = self.brave_key.as_deref().ok_or_else(|| {
            "BRAVE_SEARCH_KEY env var not set. \
             Get a free API key at https://brave.com/search/api/"
                .to_string()
        })?;

        let url = format!(
            "https://api.search.brave.com/res/v1/web/search?q={}&count={}",
            urlencoded(query),
            DEFAULT_SEARCH_COUNT,
        );
        debug!("search: {query}");
        let resp = self
            .client
            .get(&url)
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Search HTTP {status}: {body}"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse search response: {e}"))?;
        let text = format_brave_results(&body);
        if text.is_empty() {
            return Err(format!("No results for '{query}'"));
        }
        Ok(text)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, String> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(format!("Not an http(s) URL: {url}"));
        }
        debug!("extract: {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("Extract HTTP {status} for {url}"));
        }
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Failed to read page body: {e}"))?;

        let text = if is_html { html_to_text(&body) } else { body };
        if text.trim().is_empty() {
            return Err(format!("Page had no extractable text: {url}"));
        }
        Ok(format!("Source: {url}\n\n{text}"))
    }
}

impl ToolProvider for WebToolProvider {
    fn search<'a>(&'a self, query: &'a str) -> ToolFuture<'a> {
        Box::pin(self.brave_search(query))
    }

    fn extract<'a>(&'a self, url: &'a str) -> ToolFuture<'a> {
        Box::pin(self.fetch_text(url))
    }
}

/// Minimal percent-encoding for URL query parameters.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02X}"));
            }
        }
    }
    out
}

/// Format a Brave Search response as numbered `title / url / snippet` blocks.
fn format_brave_results(body: &serde_json::Value) -> String {
    let mut out = Vec::new();

    if let Some(results) = body["web"]["results"].as_array() {
        for (i, r) in results.iter().enumerate() {
            let title = r["title"].as_str().unwrap_or("");
            let url = r["url"].as_str().unwrap_or("");
            let snippet = r["description"].as_str().unwrap_or("");

            let mut entry = format!("{}. {title}\n   {url}", i + 1);
            if let Some(age) = r["page_age"].as_str().or_else(|| r["age"].as_str()) {
                entry.push_str(&format!("\n   published: {age}"));
            }
            if !snippet.is_empty() {
                entry.push_str(&format!("\n   {snippet}"));
            }
            out.push(entry);
        }
    }

    out.join("\n\n")
}

const SKIPPED: [&str; 5] = ["script", "style", "noscript", "template", "svg"];
const BLOCK: [&str; 30] = [
    "p", "div", "br", "hr", "li", "ul", "ol", "dl", "dt", "dd", "tr", "td", "th", "table", "h1",
    "h2", "h3", "h4", "h5", "h6", "section", "article", "header", "footer", "main", "nav",
    "aside", "blockquote", "pre", "title",
];

/// Reduce HTML to readable text: drop script/style/noscript bodies and tags,
/// turn block-level elements into line breaks, drop blank lines. Entities
/// are decoded once by the parser.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::with_capacity(html.len() / 2);
    collect_text(document.root_element(), &mut text);

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            let name = el.value().name();
            if SKIPPED.contains(&name) {
                continue;
            }
            let block = BLOCK.contains(&name);
            if block {
                out.push('\n');
            }
            collect_text(el, out);
            if block {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_escapes_reserved() {
        assert_eq!(urlencoded("focus blend & co"), "focus+blend+%26+co");
        assert_eq!(urlencoded("a/b?c"), "a%2Fb%3Fc");
    }

    #[test]
    fn brave_results_are_numbered() {
        let body = serde_json::json!({
            "web": {"results": [
                {"title": "Focus Blend", "url": "https://shop.example/focus",
                 "description": "Nootropic blend", "page_age": "2025-01-02"},
                {"title": "Review", "url": "https://reviews.example/focus"}
            ]}
        });
        let text = format_brave_results(&body);
        assert!(text.starts_with("1. Focus Blend\n   https://shop.example/focus"));
        assert!(text.contains("published: 2025-01-02"));
        assert!(text.contains("2. Review\n   https://reviews.example/focus"));
    }

    #[test]
    fn empty_brave_response_formats_empty() {
        assert!(format_brave_results(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn html_to_text_drops_scripts_and_tags() {
        let html = "<html><head><title>Focus Blend</title>\
                    <script>var x = '<p>';</script><style>p{}</style></head>\
                    <body><h1>Focus&nbsp;Blend</h1><p>Price: $39 &amp; free shipping</p>\
                    <ul><li>Caffeine</li><li>L-theanine</li></ul></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Focus Blend"));
        assert!(text.contains("Price: $39 & free shipping"));
        assert!(text.contains("Caffeine\nL-theanine"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("p{}"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn html_to_text_decodes_entities_once() {
        let text = html_to_text("<p>Use &amp;lt;b&amp;gt; for bold</p>");
        assert_eq!(text, "Use &lt;b&gt; for bold");
    }

    #[test]
    fn html_to_text_ignores_angle_brackets_in_attributes() {
        let text = html_to_text(r#"<p><a title="x > y" href="/a">Price</a> $39</p>"#);
        assert_eq!(text, "Price $39");
        assert!(!text.contains("href"));
    }

    #[test]
    fn html_to_text_handles_numeric_entities_and_uppercase_tags() {
        let html = "<BODY><P>O&#8217;Brien &mdash; founder</P>\
                    <SCRIPT>var hidden = 1;</SCRIPT><DIV>Since &#x32;&#48;19</DIV></BODY>";
        let text = html_to_text(html);
        assert_eq!(text, "O\u{2019}Brien \u{2014} founder\nSince 2019");
    }

    #[tokio::test]
    async fn search_without_key_fails_cleanly() {
        let provider = WebToolProvider::new(None, Duration::from_secs(1)).unwrap();
        let err = provider.search("focus blend").await.unwrap_err();
        assert!(err.contains("BRAVE_SEARCH_KEY"));
    }

    #[tokio::test]
    async fn extract_rejects_non_http_urls() {
        let provider = WebToolProvider::new(None, Duration::from_secs(1)).unwrap();
        let err = provider.extract("file:///etc/passwd").await.unwrap_err();
        assert!(err.contains("Not an http(s) URL"));
    }
}
