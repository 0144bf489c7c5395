//! Crate-level error type.
//!
//! Collaborator boundaries (tool providers, generation providers, stores)
//! report failures as `Result<T, String>`; those are absorbed inside the
//! direction loop as notes. [`ResearchError`] is reserved for the failures
//! that do reach the caller: precondition violations on a bundle or plan,
//! checkpoint I/O that makes resumption impossible, and cancellation.

use crate::bundle::DirectionType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("bundle '{bundle_id}' has no researchable directions")]
    EmptyBundle { bundle_id: String },

    #[error("plan for {direction} has no required fields")]
    EmptyPlan { direction: DirectionType },

    #[error("no plan available for {direction} in bundle '{bundle_id}'")]
    MissingPlan {
        bundle_id: String,
        direction: DirectionType,
    },

    #[error("unknown ledger field '{0}'")]
    UnknownField(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("direction {direction} failed: {reason}")]
    Direction {
        direction: DirectionType,
        reason: String,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl ResearchError {
    /// Precondition violations that abort only the bundle or direction they
    /// concern.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ResearchError::EmptyBundle { .. }
                | ResearchError::EmptyPlan { .. }
                | ResearchError::MissingPlan { .. }
                | ResearchError::UnknownField(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ResearchError>;
