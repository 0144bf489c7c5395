//! A direction's working history and its compaction.
//!
//! The window is an ordered list of [`Turn`]s: planner outputs, compressed
//! tool results, summaries of compacted spans, and loop notes. Once the
//! accumulated size crosses the budget's trigger, [`ContextWindow::compact`]
//! replaces everything older than the keep window with a single summary turn:
//!
//! ```text
//! before:  [t1 t2 t3 t4 t5 t6 t7]            size >= trigger
//!                    └ keep_chars ┘
//! after:   [S(t1..t4) t5 t6 t7]               S <= min(summary cap, size(t1..t4))
//! ```
//!
//! The kept tail is the longest suffix that fits in `keep_chars`, so it is
//! always a verbatim suffix of the pre-compaction history. The summary is
//! capped by the size of what it replaces, so compaction never grows the
//! history. If summarization fails the discarded span is dropped without a
//! summary and the caller records the loss as a note.

use super::budget::{ContextBudget, ContextUsage};
use super::summarizer::build_summarization_request;
use crate::api::retry::{RetryConfig, retry_generation};
use crate::api::{GenerationProvider, SummaryRequest};
use crate::{Message, char_len, truncate_chars};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Planner output for a step.
    Model,
    /// A tool result, already compressed.
    Tool,
    /// Synthetic summary of a compacted span.
    Summary,
    /// Loop bookkeeping: failures, closures, dropped history.
    Note,
}

impl TurnKind {
    pub fn label(&self) -> &'static str {
        match self {
            TurnKind::Model => "planner",
            TurnKind::Tool => "tool",
            TurnKind::Summary => "summary",
            TurnKind::Note => "note",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub kind: TurnKind,
    /// Step the turn belongs to (for summaries, the last step they cover).
    pub step: u32,
    pub content: String,
}

impl Turn {
    pub fn new(kind: TurnKind, step: u32, content: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            content: content.into(),
        }
    }

    pub fn model(step: u32, content: impl Into<String>) -> Self {
        Self::new(TurnKind::Model, step, content)
    }

    pub fn tool(step: u32, content: impl Into<String>) -> Self {
        Self::new(TurnKind::Tool, step, content)
    }

    pub fn summary(step: u32, content: impl Into<String>) -> Self {
        Self::new(TurnKind::Summary, step, content)
    }

    pub fn note(step: u32, content: impl Into<String>) -> Self {
        Self::new(TurnKind::Note, step, content)
    }

    pub fn size(&self) -> usize {
        char_len(&self.content)
    }

    /// Render for the planning request.
    pub fn to_message(&self) -> Message {
        match self.kind {
            TurnKind::Model => Message::assistant_text(self.content.clone()),
            TurnKind::Tool => Message::user(format!(
                "[Result of step {}]\n{}",
                self.step, self.content
            )),
            TurnKind::Summary => Message::user(format!(
                "[Summary of research through step {}]\n{}",
                self.step, self.content
            )),
            TurnKind::Note => Message::user(format!("[Note, step {}] {}", self.step, self.content)),
        }
    }
}

/// What a call to [`ContextWindow::compact`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compaction {
    /// Nothing older than the keep window; history left as is.
    Skipped,
    /// Discarded span replaced by one summary turn.
    Summarized {
        discarded_turns: usize,
        freed_chars: usize,
    },
    /// Summarization failed; discarded span dropped without a summary.
    Dropped {
        discarded_turns: usize,
        freed_chars: usize,
        error: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ContextWindow {
    turns: Vec<Turn>,
    budget: ContextBudget,
    compaction_count: u32,
}

impl ContextWindow {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            turns: Vec::new(),
            budget,
            compaction_count: 0,
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn size(&self) -> usize {
        self.turns.iter().map(Turn::size).sum()
    }

    pub fn usage(&self) -> ContextUsage {
        self.budget.usage(self.size())
    }

    pub fn should_compact(&self) -> bool {
        self.budget.should_compact(self.size())
    }

    pub fn compaction_count(&self) -> u32 {
        self.compaction_count
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    /// Index of the first turn of the keep window: the longest suffix whose
    /// total size fits in `keep_chars`. The newest turn is always kept, even
    /// when it alone exceeds `keep_chars`.
    pub fn keep_boundary(&self) -> usize {
        let Some(newest) = self.turns.last() else {
            return 0;
        };
        let mut kept = newest.size();
        let mut boundary = self.turns.len() - 1;
        for (i, turn) in self.turns.iter().enumerate().rev().skip(1) {
            let size = turn.size();
            if kept + size > self.budget.keep_chars {
                break;
            }
            kept += size;
            boundary = i;
        }
        boundary
    }

    /// Replace everything older than the keep window with one summary turn.
    pub async fn compact(
        &mut self,
        generator: &dyn GenerationProvider,
        retry: &RetryConfig,
    ) -> Compaction {
        let boundary = self.keep_boundary();
        if boundary == 0 {
            return Compaction::Skipped;
        }

        let discarded: Vec<Turn> = self.turns.drain(..boundary).collect();
        let discarded_chars: usize = discarded.iter().map(Turn::size).sum();
        let last_step = discarded.last().map_or(0, |t| t.step);
        let cap = self.budget.summary_max_chars.min(discarded_chars);

        debug!(
            "Compacting {} turn(s) ({} chars), keeping {} turn(s)",
            discarded.len(),
            discarded_chars,
            self.turns.len()
        );

        let (instructions, text) = build_summarization_request(&discarded);
        let request = SummaryRequest {
            instructions,
            text,
            max_chars: cap,
        };
        let result = retry_generation(retry, "history summary", || {
            generator.summarize(&request)
        })
        .await
        .and_then(|summary| {
            let text = summary.text.trim();
            if text.is_empty() {
                Err("summarizer returned empty text".to_string())
            } else {
                Ok(truncate_chars(text, cap).to_string())
            }
        });

        self.compaction_count += 1;
        match result {
            Ok(summary) => {
                let freed_chars = discarded_chars - char_len(&summary);
                self.turns.insert(0, Turn::summary(last_step, summary));
                info!(
                    "Compacted history: {} turn(s) summarized, {} chars freed",
                    discarded.len(),
                    freed_chars
                );
                Compaction::Summarized {
                    discarded_turns: discarded.len(),
                    freed_chars,
                }
            }
            Err(error) => {
                warn!(
                    "History summarization failed, dropping {} turn(s): {error}",
                    discarded.len()
                );
                Compaction::Dropped {
                    discarded_turns: discarded.len(),
                    freed_chars: discarded_chars,
                    error,
                }
            }
        }
    }
}
