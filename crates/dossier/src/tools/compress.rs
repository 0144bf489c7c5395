//! Budgeted compression of external tool output.
//!
//! A search or page extraction can return megabytes of boilerplate. Before
//! a result enters a direction's history it goes through [`Compressor`]:
//!
//! 1. The raw payload is archived as an artifact, so the permanent record is
//!    lossless.
//! 2. Citations (title, URL, optional date/score) are extracted
//!    deterministically from the raw payload, each with the byte offset where
//!    its URL occurs.
//! 3. Payloads already within the target size pass through unchanged apart
//!    from trimming. Longer ones are summarized to at most `target_chars`.
//!    Sources the summarizer reports are kept only if their URL occurs in
//!    the raw payload.
//! 4. If summarization fails, the result is a truncation of the raw payload
//!    with a degraded-compression marker. Compression never fails outright.

use crate::api::retry::{RetryConfig, retry_generation};
use crate::api::{GenerationProvider, SummaryRequest};
use crate::tools::artifacts::{ArtifactStore, FileRef};
use crate::{char_len, truncate_chars};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Marker appended to a truncated payload when summarization failed.
pub const DEGRADED_MARKER: &str = "[compression degraded: summarizer unavailable, output truncated]";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Search,
    Extract,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Search => "search",
            ResultKind::Extract => "extract",
        }
    }

    fn instructions(&self, target_chars: usize) -> String {
        let focus = match self {
            ResultKind::Search => {
                "These are web search results. Keep the results that bear on the research \
                 question, one line each with its URL. Drop ads, navigation and duplicates."
            }
            ResultKind::Extract => {
                "This is the text of a single web page. Keep concrete facts: names, roles, \
                 prices, ingredients, dates, claims and who makes them. Drop navigation, \
                 cookie banners and boilerplate."
            }
        };
        format!(
            "{focus}\n\nWrite at most {target_chars} characters. Preserve URLs, numbers and \
             names verbatim. Do not add facts that are not in the text. End with a \
             'Sources:' list of '- [title](url)' lines for the URLs you relied on."
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Byte offset of the URL in the raw payload.
    pub offset: usize,
}

/// Bounded, citation-preserving stand-in for a raw tool result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompressedSummary {
    pub summary_text: String,
    pub citations: Vec<Citation>,
    /// Where the raw payload was archived, if archiving succeeded.
    pub raw_ref: Option<FileRef>,
    pub degraded: bool,
}

impl CompressedSummary {
    /// Text placed in the agent's history.
    pub fn render(&self) -> String {
        let mut out = self.summary_text.clone();
        if !self.citations.is_empty() {
            out.push_str("\n\nSources:");
            for c in &self.citations {
                out.push_str(&format!("\n- [{}]({})", c.title, c.url));
                if let Some(ref date) = c.date {
                    out.push_str(&format!(" ({date})"));
                }
            }
        }
        if let Some(ref raw) = self.raw_ref {
            out.push_str(&format!("\n\nFull output archived at {raw}"));
        }
        out
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CompressorConfig {
    /// Upper bound on `summary_text`.
    pub target_chars: usize,
    /// Citations kept for summarized payloads.
    pub max_citations: usize,
    /// How much of the raw payload the summarizer sees.
    pub max_input_chars: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            target_chars: 2_000,
            max_citations: 8,
            max_input_chars: 60_000,
        }
    }
}

pub struct Compressor<'a> {
    config: &'a CompressorConfig,
    retry: &'a RetryConfig,
    generator: &'a dyn GenerationProvider,
    store: &'a dyn ArtifactStore,
}

impl<'a> Compressor<'a> {
    pub fn new(
        config: &'a CompressorConfig,
        retry: &'a RetryConfig,
        generator: &'a dyn GenerationProvider,
        store: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            config,
            retry,
            generator,
            store,
        }
    }

    /// Archive `raw` at `archive_path`, then compress it.
    pub async fn compress(
        &self,
        raw: &str,
        kind: ResultKind,
        archive_path: &str,
    ) -> CompressedSummary {
        let raw_ref = match self.store.write_artifact(archive_path, raw) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Failed to archive raw {} result: {e}", kind.as_str());
                None
            }
        };

        let extracted = extract_citations(raw);
        let target = self.config.target_chars;
        let trimmed = raw.trim();

        if char_len(trimmed) <= target {
            return CompressedSummary {
                summary_text: trimmed.to_string(),
                citations: extracted,
                raw_ref,
                degraded: false,
            };
        }

        let request = SummaryRequest {
            instructions: kind.instructions(target),
            text: truncate_chars(trimmed, self.config.max_input_chars).to_string(),
            max_chars: target,
        };
        let result = retry_generation(self.retry, "tool result summary", || {
            self.generator.summarize(&request)
        })
        .await;

        match result {
            Ok(summary) if !summary.text.trim().is_empty() => {
                let mut citations: Vec<Citation> = Vec::new();
                let mut seen = HashSet::new();
                for source in &summary.sources {
                    if let Some(offset) = raw.find(source.url.as_str())
                        && seen.insert(source.url.clone())
                    {
                        let known = extracted.iter().find(|c| c.url == source.url);
                        citations.push(Citation {
                            title: source
                                .title
                                .clone()
                                .or_else(|| known.map(|c| c.title.clone()))
                                .unwrap_or_else(|| host_of(&source.url).to_string()),
                            url: source.url.clone(),
                            date: known.and_then(|c| c.date.clone()),
                            score: known.and_then(|c| c.score),
                            offset,
                        });
                    }
                }
                for c in &extracted {
                    if citations.len() >= self.config.max_citations {
                        break;
                    }
                    if seen.insert(c.url.clone()) {
                        citations.push(c.clone());
                    }
                }
                citations.truncate(self.config.max_citations);

                let summary_text = truncate_chars(summary.text.trim(), target).to_string();
                debug!(
                    "Compressed {} result: {} -> {} chars, {} citation(s)",
                    kind.as_str(),
                    char_len(raw),
                    char_len(&summary_text),
                    citations.len()
                );
                CompressedSummary {
                    summary_text,
                    citations,
                    raw_ref,
                    degraded: false,
                }
            }
            other => {
                let reason = match other {
                    Err(e) => e,
                    Ok(_) => "summarizer returned empty text".to_string(),
                };
                warn!("Degraded compression of {} result: {reason}", kind.as_str());
                let room = target.saturating_sub(char_len(DEGRADED_MARKER) + 1);
                let mut summary_text = truncate_chars(trimmed, room).to_string();
                summary_text.push('\n');
                summary_text.push_str(DEGRADED_MARKER);
                let mut citations = extracted;
                citations.truncate(self.config.max_citations);
                CompressedSummary {
                    summary_text: truncate_chars(&summary_text, target).to_string(),
                    citations,
                    raw_ref,
                    degraded: true,
                }
            }
        }
    }
}

// ── Citation extraction ────────────────────────────────────────────

/// Extract citations from a raw payload, deduplicated by URL in order of
/// first occurrence. JSON payloads are walked for objects carrying a `url`;
/// anything else is scanned for `http(s)://` tokens.
pub fn extract_citations(raw: &str) -> Vec<Citation> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        collect_json_citations(&value, raw, &mut seen, &mut out);
        if !out.is_empty() {
            out.sort_by_key(|c| c.offset);
            return out;
        }
    }

    for (offset, url) in find_urls(raw) {
        if seen.insert(url.to_string()) {
            out.push(Citation {
                title: title_near(raw, offset).unwrap_or_else(|| host_of(url).to_string()),
                url: url.to_string(),
                date: None,
                score: None,
                offset,
            });
        }
    }
    out
}

fn collect_json_citations(
    value: &serde_json::Value,
    raw: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<Citation>,
) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(url) = map.get("url").and_then(|v| v.as_str())
                && let Some(offset) = raw.find(url)
                && seen.insert(url.to_string())
            {
                let text = |key: &str| map.get(key).and_then(|v| v.as_str()).map(str::to_string);
                out.push(Citation {
                    title: text("title")
                        .or_else(|| text("name"))
                        .unwrap_or_else(|| host_of(url).to_string()),
                    url: url.to_string(),
                    date: text("date").or_else(|| text("page_age")).or_else(|| text("age")),
                    score: map.get("score").and_then(|v| v.as_f64()),
                    offset,
                });
            }
            for v in map.values() {
                collect_json_citations(v, raw, seen, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_json_citations(v, raw, seen, out);
            }
        }
        _ => {}
    }
}

/// Every `http(s)://` token in `text`, with its byte offset.
pub fn find_urls(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = text.get(from..).and_then(|rest| rest.find("http")) {
        let start = from + pos;
        let tail = text.get(start..).unwrap_or_default();
        if tail.starts_with("https://") || tail.starts_with("http://") {
            let end = tail
                .find(|c: char| {
                    c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | ')' | ']' | '`' | ',')
                })
                .unwrap_or(tail.len());
            let url = tail
                .get(..end)
                .unwrap_or_default()
                .trim_end_matches(['.', ';', ':', '!', '?']);
            if url.len() > "https://".len() {
                out.push((start, url));
            }
            from = start + end.max(4);
        } else {
            from = start + 4;
        }
    }
    out
}

/// Best-effort title: text before the URL on its line, else the nearest
/// non-empty line above it unless that line is itself a link.
fn title_near(raw: &str, offset: usize) -> Option<String> {
    let before = raw.get(..offset)?;
    let mut lines = before.rsplit('\n');
    let same_line = clean_title(lines.next().unwrap_or_default());
    if !same_line.is_empty() {
        return Some(same_line);
    }
    lines
        .find(|l| !l.trim().is_empty())
        .filter(|l| !l.contains("://"))
        .map(clean_title)
        .filter(|l| !l.is_empty() && char_len(l) <= 200)
}

fn clean_title(line: &str) -> String {
    let line = line.trim();
    // Markdown link: "[title](" leaves "[title" plus "](".
    let line = line.strip_suffix('(').unwrap_or(line).trim_end_matches(']');
    let line = match line.rfind('[') {
        Some(i) => line.get(i + 1..).unwrap_or(line),
        None => line,
    };
    line.trim_start_matches(|c: char| {
        c.is_ascii_digit() || c.is_whitespace() || matches!(c, '.' | '-' | '*' | '#' | '>' | ')')
    })
    .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '|' | '(' | '<'))
    .trim()
    .to_string()
}

fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SourceRef;
    use crate::test_support::ScriptedGenerator;
    use crate::tools::artifacts::MemoryArtifactStore;

    fn long_search_result() -> String {
        let mut raw = String::new();
        let mut i = 0;
        while raw.len() < 50_000 {
            raw.push_str(&format!(
                "{i}. Focus Blend review part {i}\n   https://reviews.example/focus-{i}\n   \
                 Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod \
                 tempor incididunt ut labore et dolore magna aliqua.\n\n"
            ));
            i += 1;
        }
        raw
    }

    #[tokio::test]
    async fn long_result_is_bounded_with_traceable_citation() {
        let raw = long_search_result();
        assert!(raw.len() >= 50_000);
        let store = MemoryArtifactStore::new();
        let generator = ScriptedGenerator::new().with_summary("p".repeat(5_000));
        let config = CompressorConfig::default();
        let retry = RetryConfig::immediate();
        let compressor = Compressor::new(&config, &retry, &generator, &store);

        let summary = compressor
            .compress(&raw, ResultKind::Search, "b/PRODUCT/r/raw/step-001-search.txt")
            .await;

        assert!(char_len(&summary.summary_text) <= 2_000);
        assert!(!summary.degraded);
        assert!(!summary.citations.is_empty());
        for c in &summary.citations {
            assert!(raw.contains(&c.url));
            assert_eq!(raw.get(c.offset..c.offset + c.url.len()), Some(c.url.as_str()));
        }
        let archived = store
            .read_artifact(summary.raw_ref.as_ref().unwrap())
            .unwrap();
        assert_eq!(archived, raw);
    }

    #[tokio::test]
    async fn summarizer_sources_must_occur_in_raw() {
        let raw = long_search_result();
        let store = MemoryArtifactStore::new();
        let generator = ScriptedGenerator::new().with_summary_and_sources(
            "Reviews are mixed.",
            vec![
                SourceRef {
                    url: "https://reviews.example/focus-3".into(),
                    title: Some("Review 3".into()),
                },
                SourceRef {
                    url: "https://invented.example/".into(),
                    title: None,
                },
            ],
        );
        let config = CompressorConfig::default();
        let retry = RetryConfig::immediate();
        let compressor = Compressor::new(&config, &retry, &generator, &store);
        let summary = compressor
            .compress(&raw, ResultKind::Search, "b/PRODUCT/r/raw/x.txt")
            .await;

        assert_eq!(summary.citations[0].url, "https://reviews.example/focus-3");
        assert_eq!(summary.citations[0].title, "Review 3");
        assert!(
            summary
                .citations
                .iter()
                .all(|c| !c.url.contains("invented"))
        );
        assert!(summary.citations.len() <= config.max_citations);
    }

    #[tokio::test]
    async fn short_input_passes_through_with_all_citations() {
        let short = "Price: $39 per tub.\n- [Shop](https://shop.example/focus)\n\
                     - [Label](https://label.example/focus.pdf)";
        let store = MemoryArtifactStore::new();
        let generator = ScriptedGenerator::new().failing_summaries();
        let config = CompressorConfig::default();
        let retry = RetryConfig::immediate();
        let compressor = Compressor::new(&config, &retry, &generator, &store);

        let once = compressor
            .compress(short, ResultKind::Extract, "b/PRODUCT/r/raw/a.txt")
            .await;
        let twice = compressor
            .compress(&once.summary_text, ResultKind::Extract, "b/PRODUCT/r/raw/b.txt")
            .await;

        assert_eq!(once.summary_text, short);
        assert_eq!(twice.summary_text, once.summary_text);
        assert_eq!(twice.citations, once.citations);
        assert_eq!(once.citations.len(), 2);
        assert_eq!(once.citations[0].title, "Shop");
        assert!(generator.summary_requests().is_empty());
    }

    #[tokio::test]
    async fn failed_summary_degrades_to_marked_truncation() {
        let raw = long_search_result();
        let store = MemoryArtifactStore::new();
        let generator = ScriptedGenerator::new().failing_summaries();
        let config = CompressorConfig::default();
        let retry = RetryConfig::immediate();
        let compressor = Compressor::new(&config, &retry, &generator, &store);

        let summary = compressor
            .compress(&raw, ResultKind::Search, "b/PRODUCT/r/raw/c.txt")
            .await;
        assert!(summary.degraded);
        assert!(summary.summary_text.ends_with(DEGRADED_MARKER));
        assert!(char_len(&summary.summary_text) <= config.target_chars);
        assert!(summary.summary_text.starts_with("0. Focus Blend review part 0"));
        assert!(!summary.citations.is_empty());
    }

    #[test]
    fn json_payload_citations_carry_metadata() {
        let raw = r#"{"web":{"results":[
            {"title":"Focus Blend","url":"https://shop.example/focus","page_age":"2025-03-01"},
            {"title":"Dup","url":"https://shop.example/focus"},
            {"name":"Label","url":"https://label.example/l.pdf","score":0.82}
        ]}}"#;
        let citations = extract_citations(raw);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title, "Focus Blend");
        assert_eq!(citations[0].date.as_deref(), Some("2025-03-01"));
        assert_eq!(citations[1].title, "Label");
        assert_eq!(citations[1].score, Some(0.82));
    }

    #[test]
    fn find_urls_strips_trailing_punctuation() {
        let urls = find_urls("See https://a.example/x. Also (http://b.example/y), and httpx.");
        let urls: Vec<&str> = urls.into_iter().map(|(_, u)| u).collect();
        assert_eq!(urls, vec!["https://a.example/x", "http://b.example/y"]);
    }

    #[test]
    fn title_falls_back_to_previous_line_then_host() {
        let raw = "1. Acme Labs - About\n   https://acme.example/about\nhttps://bare.example/p";
        let citations = extract_citations(raw);
        assert_eq!(citations[0].title, "Acme Labs - About");
        assert_eq!(citations[1].title, "bare.example");
    }

    #[test]
    fn render_lists_sources_and_archive() {
        let summary = CompressedSummary {
            summary_text: "Price is $39.".into(),
            citations: vec![Citation {
                title: "Shop".into(),
                url: "https://shop.example".into(),
                date: None,
                score: None,
                offset: 0,
            }],
            raw_ref: Some(FileRef::new("b/PRODUCT/r/raw/x.txt")),
            degraded: false,
        };
        let text = summary.render();
        assert!(text.contains("- [Shop](https://shop.example)"));
        assert!(text.ends_with("Full output archived at b/PRODUCT/r/raw/x.txt"));
    }
}
