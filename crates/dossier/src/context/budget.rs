//! Context budget for a direction's working history.
//!
//! All sizes are measured in characters. Token counts are only estimated
//! (3.5 chars per token) for log lines; the compaction decision itself is
//! made on characters so it is exact and reproducible across resumes.

use serde::{Deserialize, Serialize};

/// Default characters per token (conservative estimate for English text).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Size limits for one agent's history.
///
/// # Example
///
/// ```ignore
/// let budget = ContextBudget::default()
///     .with_max_chars(60_000)
///     .with_keep_chars(15_000);
///
/// if budget.should_compact(window.size()) {
///     println!("{}", budget.usage(window.size()).to_log_string());
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudget {
    /// Maximum history size.
    pub max_chars: usize,
    /// Fraction of `max_chars` at which compaction triggers.
    pub trigger_fraction: f64,
    /// Size of the verbatim tail kept through a compaction.
    pub keep_chars: usize,
    /// Upper bound on the synthetic summary turn.
    pub summary_max_chars: usize,
    pub chars_per_token: f64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chars: 48_000,
            trigger_fraction: 0.75,
            keep_chars: 12_000,
            summary_max_chars: 4_000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextBudget {
    pub fn with_max_chars(mut self, max: usize) -> Self {
        self.max_chars = max;
        self
    }

    pub fn with_trigger_fraction(mut self, fraction: f64) -> Self {
        self.trigger_fraction = fraction;
        self
    }

    pub fn with_keep_chars(mut self, keep: usize) -> Self {
        self.keep_chars = keep;
        self
    }

    pub fn with_summary_max_chars(mut self, max: usize) -> Self {
        self.summary_max_chars = max;
        self
    }

    /// History size at which compaction triggers.
    pub fn trigger_chars(&self) -> usize {
        (self.max_chars as f64 * self.trigger_fraction.clamp(0.0, 1.0)) as usize
    }

    pub fn should_compact(&self, size: usize) -> bool {
        size >= self.trigger_chars()
    }

    pub fn usage(&self, size: usize) -> ContextUsage {
        let usage_pct = if self.max_chars > 0 {
            size as f64 / self.max_chars as f64
        } else {
            1.0
        };
        ContextUsage {
            chars: size,
            estimated_tokens: estimate_tokens(size, self.chars_per_token),
            usage_pct,
        }
    }
}

/// Snapshot of history usage at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    pub chars: usize,
    pub estimated_tokens: usize,
    /// Usage as a fraction of `max_chars` (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "history: {} chars (~{} tokens, {:.0}%)",
            self.chars,
            self.estimated_tokens,
            self.usage_pct * 100.0
        )
    }
}

pub fn estimate_tokens(chars: usize, chars_per_token: f64) -> usize {
    if chars_per_token <= 0.0 {
        return chars;
    }
    (chars as f64 / chars_per_token) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_at_fraction_of_max() {
        let budget = ContextBudget::default()
            .with_max_chars(1_000)
            .with_trigger_fraction(0.75);
        assert_eq!(budget.trigger_chars(), 750);
        assert!(!budget.should_compact(749));
        assert!(budget.should_compact(750));
    }

    #[test]
    fn usage_estimates_tokens() {
        let budget = ContextBudget::default().with_max_chars(7_000);
        let usage = budget.usage(3_500);
        assert_eq!(usage.estimated_tokens, 1_000);
        assert!((usage.usage_pct - 0.5).abs() < f64::EPSILON);
        assert!(usage.to_log_string().contains("50%"));
    }

    #[test]
    fn zero_max_is_always_full() {
        let budget = ContextBudget::default().with_max_chars(0);
        assert!(budget.should_compact(0));
        assert_eq!(budget.usage(10).usage_pct, 1.0);
    }

    #[test]
    fn deserializes_with_defaults() {
        let budget: ContextBudget = serde_json::from_str(r#"{"keep_chars": 500}"#).unwrap();
        assert_eq!(budget.keep_chars, 500);
        assert_eq!(budget.max_chars, 48_000);
    }
}
