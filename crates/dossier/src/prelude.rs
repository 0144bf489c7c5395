//! Convenience re-exports for common `dossier` types.
//!
//! ```ignore
//! use dossier::prelude::*;
//! ```
//!
//! Covers what a program needs to research a bundle end to end: the
//! OpenRouter client and generator, the web tool provider, stores, the
//! orchestrator and its config, and event handlers. Lower-level pieces
//! (the direction agent, compressor, context window) are imported from their
//! modules directly.

pub use std::sync::Arc;
pub use std::time::Duration;

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{DEFAULT_MODEL, Message, OpenRouterClient};

// ── Bundles and plans ───────────────────────────────────────────────
pub use crate::bundle::{Bundle, Candidate, DirectionType};
pub use crate::error::ResearchError;
pub use crate::plan::{DirectionPlan, PlanFlags, PlanSource, RulePlanSource, StaticPlanSource};

// ── Generation ──────────────────────────────────────────────────────
pub use crate::api::openrouter::{GeneratorConfig, OpenRouterGenerator};
pub use crate::api::{GenerationProvider, RetryConfig};

// ── Research runtime ────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, BundleOrchestrator, BundleOutcome, CheckpointStore, CompositeEventHandler,
    DirectionStatus, EventHandler, FileCheckpointStore, FnEventHandler, LoggingHandler,
    MemoryCheckpointStore, NoopHandler, OrchestratorConfig, ResearchEvent,
};

// ── Tools and storage ───────────────────────────────────────────────
pub use crate::context::ContextBudget;
pub use crate::tools::{
    ArtifactStore, CompressorConfig, FileRef, FsArtifactStore, MemoryArtifactStore, ToolProvider,
    WebToolProvider,
};
