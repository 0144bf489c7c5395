//! Prompts for compacting a direction's history.
//!
//! Compaction summarizes the discarded span of turns in one cheap call. When
//! the span starts with an earlier summary turn, that summary is passed as
//! the merge base so the result stays a single standalone summary rather than
//! a chain of summaries of summaries.

use super::window::{Turn, TurnKind};

const HISTORY_SUMMARY_PROMPT: &str = "\
Summarize the following research history concisely. Focus on:
- Facts established so far, with the URL that supports each one
- Searches and pages that turned up nothing useful
- Tool failures and what was tried instead
- Questions that are still open

Rules:
- Only include facts explicitly stated in the history. Do not infer or extrapolate.
- Preserve URLs, names, prices and dates verbatim.
- If there is an existing summary, merge the new information into it to produce a single \
  cohesive summary that replaces it entirely.";

/// Build the (instructions, text) pair for summarizing `span`.
pub fn build_summarization_request(span: &[Turn]) -> (String, String) {
    let mut content = String::new();
    let (existing, rest) = match span.split_first() {
        Some((first, rest)) if first.kind == TurnKind::Summary => (Some(first), rest),
        _ => (None, span),
    };

    if let Some(existing) = existing {
        content.push_str("=== EXISTING SUMMARY ===\n");
        content.push_str(&existing.content);
        content.push_str("\n\n=== NEW HISTORY TO SUMMARIZE ===\n");
    }

    for turn in rest {
        content.push_str(&format!(
            "[step {} {}]: {}\n\n",
            turn.step,
            turn.kind.label(),
            turn.content
        ));
    }

    (HISTORY_SUMMARY_PROMPT.to_string(), content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_existing_summary() {
        let span = vec![
            Turn::model(1, "search for Focus Blend price"),
            Turn::tool(1, "Focus Blend costs $39 at https://shop.example"),
        ];
        let (system, user) = build_summarization_request(&span);
        assert!(system.contains("Summarize"));
        assert!(user.contains("[step 1 tool]: Focus Blend costs $39"));
        assert!(!user.contains("EXISTING SUMMARY"));
    }

    #[test]
    fn leading_summary_becomes_merge_base() {
        let span = vec![
            Turn::summary(2, "Price is $39."),
            Turn::tool(3, "Ingredients page returned 404"),
        ];
        let (_, user) = build_summarization_request(&span);
        assert!(user.starts_with("=== EXISTING SUMMARY ===\nPrice is $39."));
        assert!(user.contains("Ingredients page returned 404"));
        assert!(!user.contains("[step 2 summary]"));
    }
}
