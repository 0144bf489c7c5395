//! Bounded planning history.
//!
//! 1. **[`budget`]**: [`ContextBudget`] sizes the window in characters and
//!    decides when compaction triggers (75% of the maximum by default).
//!
//! 2. **[`window`]**: [`ContextWindow`] holds the direction's turns. On
//!    compaction everything older than the keep window is summarized into one
//!    summary turn; if summarization fails the span is dropped and a note turn
//!    records the loss.
//!
//! 3. **[`summarizer`]**: the prompt for that summarization call, merging
//!    any earlier summary so there is never more than one.

pub mod budget;
pub mod summarizer;
pub mod window;

pub use budget::{ContextBudget, ContextUsage, DEFAULT_CHARS_PER_TOKEN};
pub use window::{Compaction, ContextWindow, Turn, TurnKind};
