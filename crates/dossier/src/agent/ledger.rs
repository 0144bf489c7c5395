//! Requirement ledger: which required fields a direction has established.
//!
//! One entry per field of the [`DirectionPlan`](crate::plan::DirectionPlan),
//! created `todo` at direction start and never removed. Only the planning
//! step writes to it. Status normally moves `todo → in_progress →
//! done | not_found`, but any transition is accepted; a move away from a
//! resolved status (e.g. `done → in_progress` after contradicting evidence)
//! is reported as a regression so callers can log it.

use crate::error::{ResearchError, Result};
use crate::tools::artifacts::FileRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    NotFound,
}

impl FieldStatus {
    /// `done` and `not_found` both count as resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(self, FieldStatus::Done | FieldStatus::NotFound)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Todo => "todo",
            FieldStatus::InProgress => "in_progress",
            FieldStatus::Done => "done",
            FieldStatus::NotFound => "not_found",
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub field: String,
    pub status: FieldStatus,
    #[serde(default)]
    pub evidence_refs: Vec<FileRef>,
    #[serde(default)]
    pub notes: String,
}

/// Result of a single [`Ledger::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: FieldStatus,
    pub to: FieldStatus,
}

impl StatusChange {
    pub fn is_regression(&self) -> bool {
        self.from.is_resolved() && !self.to.is_resolved()
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// All fields start `todo`. Duplicate field names collapse to one entry.
    pub fn init<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for field in fields {
            let field = field.into();
            if !entries.iter().any(|e| e.field == field) {
                entries.push(LedgerEntry {
                    field,
                    status: FieldStatus::Todo,
                    evidence_refs: Vec::new(),
                    notes: String::new(),
                });
            }
        }
        Self { entries }
    }

    /// Set a field's status, appending new evidence and replacing notes when
    /// given.
    pub fn update(
        &mut self,
        field: &str,
        status: FieldStatus,
        evidence_refs: &[FileRef],
        notes: Option<&str>,
    ) -> Result<StatusChange> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.field == field)
            .ok_or_else(|| ResearchError::UnknownField(field.to_string()))?;

        let change = StatusChange {
            from: entry.status,
            to: status,
        };
        entry.status = status;
        for r in evidence_refs {
            if !entry.evidence_refs.contains(r) {
                entry.evidence_refs.push(r.clone());
            }
        }
        if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            entry.notes = notes.to_string();
        }
        Ok(change)
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_resolved())
    }

    pub fn get(&self, field: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.field == field)
    }

    pub fn status(&self, field: &str) -> Option<FieldStatus> {
        self.get(field).map(|e| e.status)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| !e.status.is_resolved())
    }

    pub fn unresolved_fields(&self) -> Vec<String> {
        self.unresolved().map(|e| e.field.clone()).collect()
    }

    /// Counts of (resolved, total).
    pub fn progress(&self) -> (usize, usize) {
        let resolved = self
            .entries
            .iter()
            .filter(|e| e.status.is_resolved())
            .count();
        (resolved, self.entries.len())
    }

    /// Markdown table for prompts and reports.
    pub fn render(&self) -> String {
        let mut out = String::from("| field | status | evidence | notes |\n|---|---|---|---|\n");
        for e in &self.entries {
            let evidence = if e.evidence_refs.is_empty() {
                "-".to_string()
            } else {
                e.evidence_refs
                    .iter()
                    .map(|r| r.path.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let notes = if e.notes.is_empty() { "-" } else { &e.notes };
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                e.field, e.status, evidence, notes
            ));
        }
        out
    }
}
