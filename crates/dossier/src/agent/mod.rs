//! Research runtime: the per-direction state machine and the bundle
//! orchestrator that drives it.
//!
//! - [`orchestrator::BundleOrchestrator`]: runs every direction of a
//!   bundle, isolates failures, resumes interrupted runs. Start here.
//! - [`direction::DirectionAgent`]: the `Init -> Planning -> Acting ->
//!   Synthesizing -> Done` loop for one direction.
//! - [`ledger`]: required-field tracking with evidence and notes.
//! - [`state`]: the serializable direction state carried by checkpoints.
//! - [`checkpoint`]: namespaced, append-only checkpoint stores.
//! - [`events`]: [`ResearchEvent`] and the [`EventHandler`] family.
//! - [`config`]: [`AgentConfig`] and [`OrchestratorConfig`].
//! - [`prompt`]: planning and synthesis prompts.

pub mod checkpoint;
pub mod config;
pub mod direction;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod prompt;
pub mod state;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Namespace};
pub use config::{AgentConfig, OrchestratorConfig};
pub use direction::DirectionAgent;
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    ResearchEvent,
};
pub use ledger::{FieldStatus, Ledger};
pub use orchestrator::{BundleOrchestrator, BundleOutcome, DirectionStatus, DirectionSummary};
pub use prompt::SystemPromptBuilder;
pub use state::{DirectionAgentState, DirectionResult, Phase, Termination, TurnFraming};
