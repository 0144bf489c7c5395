//! Serializable state of one direction agent.
//!
//! [`DirectionAgentState`] is everything a checkpoint needs to continue a
//! direction exactly where it stopped: the phase, the planning framing,
//! the ledger, the compacted history, and the append-only `file_refs` and
//! `notes` sequences. The agent is its only writer; the orchestrator reads
//! the terminal snapshot through [`DirectionResult`].

use crate::agent::checkpoint::Namespace;
use crate::agent::ledger::Ledger;
use crate::bundle::DirectionType;
use crate::context::budget::ContextBudget;
use crate::context::window::ContextWindow;
use crate::plan::DirectionPlan;
use crate::tools::actions::Action;
use crate::tools::artifacts::FileRef;
use serde::{Deserialize, Serialize};

/// Direction state machine: `Init -> Planning -> Acting -> (Planning |
/// Synthesizing) -> Done`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Planning,
    Acting,
    Synthesizing,
    Done,
}

/// Framing sub-machine inside `Planning`. The first planning call gets the
/// full briefing; every later one gets a progress reminder.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnFraming {
    #[default]
    FirstTurn,
    SubsequentTurn,
}

impl TurnFraming {
    pub fn advance(self) -> Self {
        TurnFraming::SubsequentTurn
    }
}

/// Why research stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every ledger field resolved (possibly closed by a `complete` action).
    LedgerComplete,
    StepCap,
    /// The direction's wall-clock budget ran out.
    Deadline,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::LedgerComplete => "ledger_complete",
            Termination::StepCap => "step_cap",
            Termination::Deadline => "deadline",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionAgentState {
    pub direction: DirectionType,
    pub bundle_id: String,
    pub run_id: String,
    pub plan: DirectionPlan,
    pub phase: Phase,
    pub framing: TurnFraming,
    pub steps_taken: u32,
    pub file_refs: Vec<FileRef>,
    pub notes: Vec<String>,
    pub ledger: Ledger,
    pub current_focus: Option<String>,
    pub open_questions: Vec<String>,
    /// Chosen in `Planning`, consumed in `Acting`.
    pub pending_action: Option<Action>,
    pub history: ContextWindow,
    pub final_report: Option<FileRef>,
    pub termination: Option<Termination>,
}

impl DirectionAgentState {
    /// A fresh state in `Init`. The ledger is allocated on the first
    /// transition.
    pub fn new(
        bundle_id: impl Into<String>,
        run_id: impl Into<String>,
        plan: DirectionPlan,
        budget: ContextBudget,
    ) -> Self {
        Self {
            direction: plan.direction,
            bundle_id: bundle_id.into(),
            run_id: run_id.into(),
            plan,
            phase: Phase::Init,
            framing: TurnFraming::FirstTurn,
            steps_taken: 0,
            file_refs: Vec::new(),
            notes: Vec::new(),
            ledger: Ledger::default(),
            current_focus: None,
            open_questions: Vec::new(),
            pending_action: None,
            history: ContextWindow::new(budget),
            final_report: None,
            termination: None,
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::direction(&self.bundle_id, self.direction, &self.run_id)
    }

    /// `{namespace}/{relative}`; every artifact of this direction lives
    /// under its namespace.
    pub fn artifact_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.namespace().path())
    }

    /// Append a file reference unless it is already recorded.
    pub fn record_file(&mut self, file: FileRef) {
        if !self.file_refs.contains(&file) {
            self.file_refs.push(file);
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Read-only snapshot handed back to the orchestrator.
    pub fn result(&self) -> DirectionResult {
        DirectionResult {
            direction: self.direction,
            final_report: self.final_report.clone(),
            file_refs: self.file_refs.clone(),
            notes: self.notes.clone(),
            ledger: self.ledger.clone(),
            termination: self.termination,
            steps_taken: self.steps_taken,
        }
    }
}

/// Terminal output of a direction.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionResult {
    pub direction: DirectionType,
    /// `None` when synthesis could not produce a report.
    pub final_report: Option<FileRef>,
    pub file_refs: Vec<FileRef>,
    pub notes: Vec<String>,
    pub ledger: Ledger,
    pub termination: Option<Termination>,
    pub steps_taken: u32,
}

impl DirectionResult {
    pub fn unresolved_fields(&self) -> Vec<String> {
        self.ledger.unresolved_fields()
    }

    /// A report exists and every field was resolved.
    pub fn is_complete(&self) -> bool {
        self.final_report.is_some() && self.ledger.is_complete()
    }
}
