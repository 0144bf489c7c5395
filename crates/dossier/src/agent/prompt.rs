//! Prompts for the planning and synthesis passes.
//!
//! Prompts are assembled with [`SystemPromptBuilder`]. The planning system
//! prompt carries the direction briefing (objective, candidates, seed URLs)
//! and is identical on every step; only the trailing framing turn changes
//! with [`TurnFraming`].

use crate::agent::state::{DirectionAgentState, TurnFraming};
use crate::bundle::Bundle;

/// Builder for multi-section prompts.
///
/// Sections are joined with double newlines. Empty sections (from
/// `section_if` with a false condition, or `section_opt` with `None`) are
/// skipped.
///
/// ```
/// use dossier::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You research products.")
///     .section("Objective", "Find the price.")
///     .section_opt("Focus", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Objective"));
/// assert!(!prompt.contains("## Focus"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// The `content_fn` is only called when `condition` is true.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

// ── Planning ───────────────────────────────────────────────────────

const PLANNING_PREAMBLE: &str = "You are a meticulous research agent working one direction of a \
research bundle. Each step you call the next_step tool exactly once: record what the evidence so \
far establishes in the ledger, then choose one action. Mark a field done only when a source \
supports it, and not_found only after a reasonable search. When new evidence contradicts an \
earlier finding, move the field back to in_progress and say why.";

const ACTIONS: &str = "- search: web search; returns a compressed list of results\n\
- extract: fetch one URL; returns a compressed summary of the page\n\
- write_note: save a finding as a durable note; the final report is written from notes and \
compressed results\n\
- complete: stop; any field still open is recorded as not_found";

/// Briefing shared by every planning step of a direction.
pub fn planning_system_prompt(state: &DirectionAgentState, bundle: &Bundle) -> String {
    let direction = state.direction;
    let candidates: Vec<String> = bundle
        .candidates(direction)
        .iter()
        .map(|c| match c.notes {
            Some(ref notes) => format!("- {} ({notes})", c.name),
            None => format!("- {}", c.name),
        })
        .collect();
    let urls = bundle.evidence_urls(direction);

    SystemPromptBuilder::new(PLANNING_PREAMBLE)
        .section(
            "Direction",
            format!(
                "{direction}: research the {} of bundle '{}'.",
                direction.noun(),
                state.bundle_id
            ),
        )
        .section_opt("Objective", state.plan.objective.as_deref())
        .section_opt("Anchor", bundle.anchor_name().map(|g| format!("Guest: {g}")))
        .section("Candidates", candidates.join("\n"))
        .section_if(!urls.is_empty(), "Known sources", || {
            urls.iter()
                .map(|u| format!("- {u}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .section("Required fields", state.plan.required_fields.join(", "))
        .section("Actions", ACTIONS)
        .build()
}

/// The trailing user turn for this planning step.
pub fn framing_message(state: &DirectionAgentState, max_steps: u32) -> String {
    match state.framing {
        TurnFraming::FirstTurn => format!(
            "Begin the research. All {} required fields are todo and you have {max_steps} \
             steps. Start from the known sources where they exist.\n\n{}",
            state.ledger.entries().len(),
            state.ledger.render()
        ),
        TurnFraming::SubsequentTurn => {
            let (resolved, total) = state.ledger.progress();
            let remaining = max_steps.saturating_sub(state.steps_taken);
            SystemPromptBuilder::new(format!(
                "Step {} of {max_steps}: {resolved}/{total} fields resolved, {remaining} \
                 step(s) left.",
                state.steps_taken + 1
            ))
            .section("Ledger", state.ledger.render())
            .section_opt("Current focus", state.current_focus.as_deref())
            .section_if(!state.open_questions.is_empty(), "Open questions", || {
                state
                    .open_questions
                    .iter()
                    .map(|q| format!("- {q}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .section_if(remaining <= 2, "Budget", || {
                "Few steps remain. Save what you have with write_note before the budget runs out."
                    .to_string()
            })
            .build()
        }
    }
}

// ── Synthesis ──────────────────────────────────────────────────────

/// System prompt for the final report pass.
pub fn synthesis_system_prompt(state: &DirectionAgentState) -> String {
    SystemPromptBuilder::new(
        "You write the final report for one research direction from the notes and compressed \
         source summaries below. Use only facts present in the material and cite the source URL \
         for each. Where the ledger shows a field as not_found or still open, say so plainly.",
    )
    .section(
        "Direction",
        format!("{} of bundle '{}'", state.direction, state.bundle_id),
    )
    .section_opt("Objective", state.plan.objective.as_deref())
    .section("Ledger", state.ledger.render())
    .build()
}

/// Concatenate synthesis material, one titled block per artifact.
pub fn synthesis_material<'a>(artifacts: impl IntoIterator<Item = (&'a str, String)>) -> String {
    artifacts
        .into_iter()
        .map(|(path, content)| format!("=== {path} ===\n{}", content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ledger::{FieldStatus, Ledger};
    use crate::bundle::{Candidate, DirectionType};
    use crate::context::budget::ContextBudget;
    use crate::plan::DirectionPlan;

    fn fixture() -> (DirectionAgentState, Bundle) {
        let bundle = Bundle::new("b1")
            .with_guest(Candidate::new("Dr. Example"))
            .with_candidate(
                DirectionType::Product,
                Candidate::new("Focus Blend").with_url("https://shop.example/focus"),
            );
        let plan = DirectionPlan::new(DirectionType::Product, ["price", "ingredients"])
            .with_objective("Research the product Focus Blend.");
        let mut state = DirectionAgentState::new("b1", "r1", plan, ContextBudget::default());
        state.ledger = Ledger::init(["price", "ingredients"]);
        (state, bundle)
    }

    #[test]
    fn system_prompt_carries_briefing() {
        let (state, bundle) = fixture();
        let prompt = planning_system_prompt(&state, &bundle);
        assert!(prompt.contains("## Objective\n\nResearch the product Focus Blend."));
        assert!(prompt.contains("- Focus Blend"));
        assert!(prompt.contains("- https://shop.example/focus"));
        assert!(prompt.contains("Guest: Dr. Example"));
        assert!(prompt.contains("price, ingredients"));
    }

    #[test]
    fn framing_differs_between_first_and_later_turns() {
        let (mut state, _) = fixture();
        let first = framing_message(&state, 12);
        assert!(first.starts_with("Begin the research."));

        state.framing = TurnFraming::SubsequentTurn;
        state.steps_taken = 3;
        state
            .ledger
            .update("price", FieldStatus::Done, &[], Some("$39"))
            .unwrap();
        state.current_focus = Some("ingredients".into());
        let later = framing_message(&state, 12);
        assert!(later.starts_with("Step 4 of 12: 1/2 fields resolved, 9 step(s) left."));
        assert!(later.contains("## Current focus\n\ningredients"));
        assert!(!later.contains("## Budget"));
    }

    #[test]
    fn low_budget_adds_warning() {
        let (mut state, _) = fixture();
        state.framing = TurnFraming::SubsequentTurn;
        state.steps_taken = 11;
        assert!(framing_message(&state, 12).contains("## Budget"));
    }

    #[test]
    fn material_is_titled_per_artifact() {
        let material = synthesis_material([
            ("b1/PRODUCT/r1/notes/step-002-price.md", "# Price\n$39\n".to_string()),
            ("b1/PRODUCT/r1/summaries/step-001-search.md", "results".to_string()),
        ]);
        assert!(material.starts_with("=== b1/PRODUCT/r1/notes/step-002-price.md ===\n# Price\n$39"));
        assert!(material.contains("\n\n=== b1/PRODUCT/r1/summaries/step-001-search.md ===\nresults"));
    }
}
