//! [`GenerationProvider`] backed by the OpenRouter chat completions API.
//!
//! | Call | Request shape |
//! |------|---------------|
//! | `plan` | history + forced `next_step` tool call, arguments schema-validated |
//! | `synthesize` | plain completion over the bounded material |
//! | `summarize` | plain completion on the summary model; trailing `Sources:` block parsed into [`SourceRef`]s |

use crate::api::{
    GenFuture, GenerationProvider, PlanningRequest, SourceRef, Summary, SummaryRequest,
    SynthesisRequest,
};
use crate::tools::actions::{NEXT_STEP_TOOL, PlanDecision, next_step_tool, parse_decision};
use crate::{
    Annotation, ChatCompletion, ChatRequest, DEFAULT_MODEL, Message, OpenRouterClient, Plugin,
    ToolDef,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub model: String,
    /// Model for summaries (compression and compaction). Falls back to `model`.
    pub summary_model: Option<String>,
    pub planning_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            summary_model: None,
            planning_max_tokens: 2048,
            synthesis_max_tokens: 4096,
            summary_max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

impl GeneratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = Some(model.into());
        self
    }

    fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }
}

pub struct OpenRouterGenerator {
    client: OpenRouterClient,
    config: GeneratorConfig,
    next_step: ToolDef,
}

impl OpenRouterGenerator {
    pub fn new(client: OpenRouterClient, config: GeneratorConfig) -> Self {
        Self {
            client,
            config,
            next_step: next_step_tool(),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn planning_body(&self, request: &PlanningRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Message::system(request.system.clone()));
        messages.extend(request.messages.iter().cloned());
        ChatRequest {
            model: Some(self.config.model.clone()),
            messages,
            max_tokens: self.config.planning_max_tokens,
            temperature: self.config.temperature,
            tools: Some(vec![self.next_step.clone()]),
            tool_choice: Some(self.next_step.forced_choice()),
            plugins: Some(vec![Plugin::ResponseHealing]),
            ..Default::default()
        }
    }

    fn synthesis_body(&self, request: &SynthesisRequest) -> ChatRequest {
        ChatRequest {
            model: Some(self.config.model.clone()),
            messages: vec![
                Message::system(request.system.clone()),
                Message::user(request.material.clone()),
            ],
            max_tokens: self.config.synthesis_max_tokens,
            temperature: self.config.temperature,
            ..Default::default()
        }
    }

    fn summary_body(&self, request: &SummaryRequest) -> ChatRequest {
        let system = format!(
            "{}\n\nKeep the summary under {} characters. End with a line reading \
             'Sources:' followed by each URL you relied on, one per line.",
            request.instructions, request.max_chars
        );
        ChatRequest {
            model: Some(self.config.summary_model().to_string()),
            messages: vec![Message::system(system), Message::user(request.text.clone())],
            max_tokens: self.config.summary_max_tokens,
            temperature: 0.0,
            ..Default::default()
        }
    }
}

impl GenerationProvider for OpenRouterGenerator {
    fn plan<'a>(&'a self, request: &'a PlanningRequest) -> GenFuture<'a, PlanDecision> {
        Box::pin(async move {
            let completion = self.client.chat(&self.planning_body(request)).await?;
            let decision = decision_from_completion(&completion)?;
            debug!(
                "[{}] planner chose {} ({})",
                request.direction,
                decision.action.name(),
                decision.action.argument()
            );
            Ok(decision)
        })
    }

    fn synthesize<'a>(&'a self, request: &'a SynthesisRequest) -> GenFuture<'a, String> {
        Box::pin(async move {
            let completion = self.client.chat(&self.synthesis_body(request)).await?;
            completion
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| "Empty synthesis response".to_string())
        })
    }

    fn summarize<'a>(&'a self, request: &'a SummaryRequest) -> GenFuture<'a, Summary> {
        Box::pin(async move {
            let completion = self.client.chat(&self.summary_body(request)).await?;
            let text = completion
                .content
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| "Empty summary response".to_string())?;
            Ok(parse_summary(text, &completion.annotations))
        })
    }
}

// ── Response parsing ───────────────────────────────────────────────

/// Pull the planner decision out of a completion. Prefers the `next_step`
/// tool call; falls back to a JSON object in the text for models that
/// ignore `tool_choice`.
pub fn decision_from_completion(completion: &ChatCompletion) -> Result<PlanDecision, String> {
    if let Some(call) = completion
        .tool_calls
        .iter()
        .find(|c| c.function.name == NEXT_STEP_TOOL)
    {
        return parse_decision(&call.function.arguments);
    }
    if let Some(json) = completion.content.as_deref().and_then(embedded_json) {
        return parse_decision(json);
    }
    Err(format!(
        "Planner returned no {NEXT_STEP_TOOL} call (finish_reason: {})",
        completion.finish_reason.as_deref().unwrap_or("unknown")
    ))
}

fn embedded_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    text.get(start..=end)
}

/// Split a summary into its body and trailing `Sources:` block. Response
/// annotations are merged in after the listed sources, deduplicated by URL.
pub fn parse_summary(text: &str, annotations: &[Annotation]) -> Summary {
    let lines: Vec<&str> = text.lines().collect();
    let marker = lines
        .iter()
        .rposition(|l| l.trim().trim_matches('*').eq_ignore_ascii_case("sources:"));

    let (body, source_lines) = match marker {
        Some(i) => (lines.get(..i).unwrap_or_default(), lines.get(i + 1..).unwrap_or_default()),
        None => (lines.as_slice(), &[][..]),
    };

    let mut sources: Vec<SourceRef> = Vec::new();
    let annotated = annotations
        .iter()
        .filter(|a| a.annotation_type.as_deref() == Some("url_citation"))
        .filter_map(|a| a.url_citation.as_ref())
        .map(|c| SourceRef {
            url: c.url.clone(),
            title: c.title.clone(),
        });
    for source in source_lines
        .iter()
        .filter_map(|l| parse_source_line(l))
        .chain(annotated)
    {
        if !sources.iter().any(|s| s.url == source.url) {
            sources.push(source);
        }
    }

    Summary {
        text: body.join("\n").trim().to_string(),
        sources,
    }
}

/// `- [Title](url)`, `- Title: url`, `- url`.
fn parse_source_line(line: &str) -> Option<SourceRef> {
    let line = line.trim().trim_start_matches(['-', '*', ' ']);
    let start = line.find("http")?;
    let url: String = line
        .get(start..)?
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ')' && *c != '>')
        .collect();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return None;
    }
    let prefix = line.get(..start).unwrap_or_default();
    let title = prefix
        .trim()
        .trim_start_matches('[')
        .trim_end_matches('(')
        .trim_end_matches(']')
        .trim_end_matches([':', '-', ' '])
        .trim();
    Some(SourceRef {
        url,
        title: (!title.is_empty()).then(|| title.to_string()),
    })
}
