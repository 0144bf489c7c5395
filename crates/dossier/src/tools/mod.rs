//! Everything a direction touches outside the language model.
//!
//! - [`actions`]: the planner's vocabulary ([`Action`], [`PlanDecision`]) and
//!   the `next_step` tool definition.
//! - [`provider`]: [`ToolProvider`] for `search` and `extract`, with the
//!   Brave/HTTP [`WebToolProvider`].
//! - [`compress`]: the budgeted [`Compressor`] every external result passes
//!   through before it reaches the history.
//! - [`artifacts`]: [`ArtifactStore`]: raw results, summaries, notes and
//!   reports, addressed by [`FileRef`].

pub mod actions;
pub mod artifacts;
pub mod compress;
pub mod provider;

pub use actions::{Action, PlanDecision};
pub use artifacts::{ArtifactStore, FileRef, FsArtifactStore, MemoryArtifactStore};
pub use compress::{CompressedSummary, Compressor, CompressorConfig};
pub use provider::{ToolFuture, ToolProvider, WebToolProvider};
