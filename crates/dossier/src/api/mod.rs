//! Generation layer: the contract the research loop needs from a language
//! model, and the OpenRouter implementation of it.
//!
//! - [`GenerationProvider`]: `plan` (next action), `synthesize` (final
//!   report) and `summarize` (compressor and context compaction).
//! - [`openrouter`]: [`OpenRouterGenerator`](openrouter::OpenRouterGenerator)
//!   backed by [`OpenRouterClient`](crate::OpenRouterClient).
//! - [`retry`]: bounded retries with exponential backoff and jitter.
//!
//! Every method returns `Result<_, String>`. Callers wrap each call in
//! [`retry::retry_generation`] and a timeout, then degrade on failure; a
//! generation error never aborts a direction.

pub mod openrouter;
pub mod retry;

pub use retry::RetryConfig;

use crate::Message;
use crate::bundle::DirectionType;
use crate::tools::actions::PlanDecision;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`GenerationProvider`] methods.
pub type GenFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Input to one planning call.
#[derive(Debug, Clone)]
pub struct PlanningRequest {
    /// The direction asking; lets shared providers tag or route requests.
    pub direction: DirectionType,
    pub system: String,
    /// Compacted history followed by the framing turn for this step.
    pub messages: Vec<Message>,
}

/// Input to the final synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub system: String,
    /// Concatenated notes and compressed summaries, already bounded.
    pub material: String,
}

/// Input to a summarization call.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub instructions: String,
    pub text: String,
    /// Upper bound on the summary length, in characters.
    pub max_chars: usize,
}

/// A source the summarizer claims to have used.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Output of a summarization call.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

/// The language-model collaborator.
///
/// Implementations must be cheap to share across concurrently running
/// directions (`Send + Sync`); all per-run state lives in the caller.
pub trait GenerationProvider: Send + Sync {
    /// Decide the next step: ledger updates plus exactly one action.
    fn plan<'a>(&'a self, request: &'a PlanningRequest) -> GenFuture<'a, PlanDecision>;

    /// Produce the final narrative report.
    fn synthesize<'a>(&'a self, request: &'a SynthesisRequest) -> GenFuture<'a, String>;

    /// Condense long text, reporting the sources it relied on.
    fn summarize<'a>(&'a self, request: &'a SummaryRequest) -> GenFuture<'a, Summary>;
}
