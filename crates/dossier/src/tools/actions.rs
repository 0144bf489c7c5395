//! The planner's vocabulary: one [`PlanDecision`] per planning step.
//!
//! A decision carries ledger updates, the new focus, open questions, and
//! exactly one [`Action`]. Decisions arrive as JSON tool-call arguments and
//! are validated against the schema generated from these types before they
//! are deserialized.

use crate::agent::ledger::FieldStatus;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the single tool the planner answers through.
pub const NEXT_STEP_TOOL: &str = "next_step";

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Run a web search.
    Search { query: String },
    /// Fetch one page and extract its text.
    Extract { url: String },
    /// Save a research note. Notes are the material the final report is written from.
    WriteNote { title: String, content: String },
    /// Stop researching. Fields still unresolved are closed as not_found.
    Complete { reason: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Search { .. } => "search",
            Action::Extract { .. } => "extract",
            Action::WriteNote { .. } => "write_note",
            Action::Complete { .. } => "complete",
        }
    }

    /// Short argument summary for logs and events.
    pub fn argument(&self) -> &str {
        match self {
            Action::Search { query } => query,
            Action::Extract { url } => url,
            Action::WriteNote { title, .. } => title,
            Action::Complete { reason } => reason,
        }
    }

    /// Whether the action calls an external service.
    pub fn is_external(&self) -> bool {
        matches!(self, Action::Search { .. } | Action::Extract { .. })
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    /// A field name from the ledger, exactly as listed.
    pub field: String,
    pub status: FieldStatus,
    /// Artifact paths (from "Full output archived at ...") supporting the status.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// The finding itself, or why the field could not be established.
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct PlanDecision {
    #[serde(default)]
    pub ledger_updates: Vec<LedgerUpdate>,
    /// What the next few steps concentrate on.
    #[serde(default)]
    pub focus: Option<String>,
    /// Replaces the current list of open questions.
    #[serde(default)]
    pub open_questions: Vec<String>,
    pub action: Action,
}

impl PlanDecision {
    pub fn new(action: Action) -> Self {
        Self {
            ledger_updates: Vec::new(),
            focus: None,
            open_questions: Vec::new(),
            action,
        }
    }

    pub fn with_update(
        mut self,
        field: impl Into<String>,
        status: FieldStatus,
        notes: Option<&str>,
    ) -> Self {
        self.ledger_updates.push(LedgerUpdate {
            field: field.into(),
            status,
            evidence: Vec::new(),
            notes: notes.map(str::to_string),
        });
        self
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// One-paragraph rendering kept in the history as the planner's turn.
    pub fn describe(&self) -> String {
        let mut out = format!("Action: {} ({})", self.action.name(), self.action.argument());
        if let Some(ref focus) = self.focus {
            out.push_str(&format!("\nFocus: {focus}"));
        }
        for u in &self.ledger_updates {
            out.push_str(&format!("\nLedger: {} -> {}", u.field, u.status));
            if let Some(ref notes) = u.notes {
                out.push_str(&format!(" ({notes})"));
            }
        }
        out
    }
}

/// Tool definition the planner must call.
pub fn next_step_tool() -> ToolDef {
    ToolDef::new(
        NEXT_STEP_TOOL,
        "Record ledger updates for this step and choose exactly one action: search, \
         extract, write_note, or complete. Call this tool exactly once.",
        json_schema_for::<PlanDecision>(),
    )
}

/// Validate raw tool-call arguments against the decision schema, then parse.
pub fn parse_decision(arguments: &str) -> Result<PlanDecision, String> {
    let value: serde_json::Value = serde_json::from_str(arguments)
        .map_err(|e| format!("Failed to parse planner decision: invalid JSON: {e}"))?;

    let schema = json_schema_for::<PlanDecision>();
    if let Ok(validator) = jsonschema::validator_for(&schema) {
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!(
                "Planner decision failed validation: {}",
                errors.join("; ")
            ));
        }
    }

    serde_json::from_value(value).map_err(|e| format!("Failed to parse planner decision: {e}"))
}
