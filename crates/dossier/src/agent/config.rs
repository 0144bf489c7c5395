//! Configuration for direction agents and the bundle orchestrator.
//!
//! Every type deserializes with `#[serde(default)]`, so a JSON config file
//! only needs the keys it overrides:
//!
//! ```json
//! { "concurrency": 2, "agent": { "max_steps": 20, "context": { "max_chars": 64000 } } }
//! ```
//!
//! Builder methods cover the common settings:
//!
//! ```ignore
//! let config = OrchestratorConfig::default()
//!     .with_concurrency(2)
//!     .with_agent(AgentConfig::default().with_max_steps(20).with_retries(3));
//! ```

use crate::api::retry::RetryConfig;
use crate::context::budget::ContextBudget;
use crate::tools::compress::CompressorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── AgentConfig ────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Step cap: tool invocations (and failed planning steps) per direction.
    pub max_steps: u32,
    /// Bounded wait for one search/extract call.
    pub tool_timeout_secs: u64,
    /// Optional wall-clock budget for a whole direction. Checked between
    /// steps; exceeding it ends research with termination `deadline`.
    pub direction_timeout_secs: Option<u64>,
    pub context: ContextBudget,
    pub compressor: CompressorConfig,
    /// Applies to planning, synthesis, and summarization calls.
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            tool_timeout_secs: 30,
            direction_timeout_secs: None,
            context: ContextBudget::default(),
            compressor: CompressorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_direction_timeout(mut self, timeout: Duration) -> Self {
        self.direction_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn with_context(mut self, context: ContextBudget) -> Self {
        self.context = context;
        self
    }

    pub fn with_compressor(mut self, compressor: CompressorConfig) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn direction_timeout(&self) -> Option<Duration> {
        self.direction_timeout_secs.map(Duration::from_secs)
    }
}

// ── OrchestratorConfig ─────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directions run at once. 1 runs the queue sequentially.
    pub concurrency: usize,
    pub agent: AgentConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            agent: AgentConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.agent.max_steps, 12);
        assert_eq!(config.agent.tool_timeout(), Duration::from_secs(30));
        assert!(config.agent.direction_timeout().is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"concurrency": 3, "agent": {"max_steps": 4, "context": {"max_chars": 9000}}}"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.agent.max_steps, 4);
        assert_eq!(config.agent.context.max_chars, 9000);
        assert_eq!(config.agent.context.keep_chars, ContextBudget::default().keep_chars);
        assert_eq!(config.agent.compressor, CompressorConfig::default());
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(OrchestratorConfig::default().with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = OrchestratorConfig::from_file(Path::new("/nonexistent/dossier.json")).unwrap_err();
        assert!(err.contains("Failed to read config"));
    }

    #[test]
    fn from_file_reads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dossier.json");
        std::fs::write(&path, r#"{"agent": {"direction_timeout_secs": 600}}"#).unwrap();
        let config = OrchestratorConfig::from_file(&path).unwrap();
        assert_eq!(
            config.agent.direction_timeout(),
            Some(Duration::from_secs(600))
        );
    }
}
