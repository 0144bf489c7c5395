//! Bundle orchestration: run every direction of a bundle and collect the
//! results.
//!
//! The direction queue comes from [`Bundle::directions`] (non-empty
//! categories in priority order). Directions run through a
//! `buffered(concurrency)` stream: with the default concurrency of 1 this
//! is strictly sequential, otherwise up to `concurrency` directions run at
//! once, each with its own state and checkpoint namespace. Results are
//! merged in queue order, so `direction_index` only ever advances.
//!
//! A direction that returns `Err` or panics is recorded as failed and the
//! queue moves on. Only an empty bundle, cancellation and checkpoint I/O
//! at the bundle level abort the whole run.
//!
//! ```ignore
//! let orchestrator = BundleOrchestrator::new(config, plans, generator, tools, artifacts)
//!     .with_checkpoints(Arc::new(FileCheckpointStore::new(".dossier/checkpoints")?))
//!     .with_event_handler(LoggingHandler);
//! let outcome = orchestrator.run(&bundle).await?;
//! ```

use crate::agent::checkpoint::{CheckpointStore, Namespace, generate_run_id, load_state, save_state};
use crate::agent::config::OrchestratorConfig;
use crate::agent::direction::DirectionAgent;
use crate::agent::events::{EventHandler, NoopHandler, ResearchEvent};
use crate::agent::state::DirectionResult;
use crate::api::GenerationProvider;
use crate::bundle::{Bundle, DirectionType};
use crate::error::{ResearchError, Result};
use crate::plan::PlanSource;
use crate::tools::artifacts::{ArtifactStore, FileRef};
use crate::tools::provider::ToolProvider;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

// ── Results ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionStatus {
    /// Report written and every ledger field resolved.
    Completed,
    /// Finished, but without a report or with fields left open.
    Degraded,
    /// Raised or panicked; see `error`.
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionSummary {
    pub direction: DirectionType,
    pub status: DirectionStatus,
    pub final_report: Option<FileRef>,
    pub unresolved: Vec<String>,
    pub steps_taken: u32,
    pub error: Option<String>,
}

/// Bundle orchestrator state, checkpointed after every queue advance.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BundleState {
    pub bundle_id: String,
    pub run_id: String,
    pub direction_queue: Vec<DirectionType>,
    pub direction_index: usize,
    pub file_refs: Vec<FileRef>,
    pub final_reports: Vec<FileRef>,
    pub notes: Vec<String>,
    pub directions: Vec<DirectionSummary>,
}

impl BundleState {
    fn new(bundle_id: &str, run_id: &str, direction_queue: Vec<DirectionType>) -> Self {
        Self {
            bundle_id: bundle_id.to_string(),
            run_id: run_id.to_string(),
            direction_queue,
            direction_index: 0,
            file_refs: Vec::new(),
            final_reports: Vec::new(),
            notes: Vec::new(),
            directions: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.direction_index >= self.direction_queue.len()
    }

    fn record_result(&mut self, result: DirectionResult) {
        for file in &result.file_refs {
            if !self.file_refs.contains(file) {
                self.file_refs.push(file.clone());
            }
        }
        if let Some(ref report) = result.final_report
            && !self.final_reports.contains(report)
        {
            self.final_reports.push(report.clone());
        }
        if result.final_report.is_none() {
            self.notes
                .push(format!("{}: no report produced", result.direction));
        }
        let status = if result.is_complete() {
            DirectionStatus::Completed
        } else {
            DirectionStatus::Degraded
        };
        self.directions.push(DirectionSummary {
            direction: result.direction,
            status,
            unresolved: result.unresolved_fields(),
            final_report: result.final_report,
            steps_taken: result.steps_taken,
            error: None,
        });
    }

    fn record_failure(&mut self, direction: DirectionType, error: &ResearchError) {
        self.notes.push(format!("{direction} failed: {error}"));
        self.directions.push(DirectionSummary {
            direction,
            status: DirectionStatus::Failed,
            final_report: None,
            unresolved: Vec::new(),
            steps_taken: 0,
            error: Some(error.to_string()),
        });
    }

    fn outcome(self) -> BundleOutcome {
        BundleOutcome {
            bundle_id: self.bundle_id,
            run_id: self.run_id,
            file_refs: self.file_refs,
            final_reports: self.final_reports,
            notes: self.notes,
            directions: self.directions,
        }
    }
}

/// Aggregated result of one bundle run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BundleOutcome {
    pub bundle_id: String,
    pub run_id: String,
    pub file_refs: Vec<FileRef>,
    pub final_reports: Vec<FileRef>,
    pub notes: Vec<String>,
    /// One entry per queued direction, in queue order.
    pub directions: Vec<DirectionSummary>,
}

impl BundleOutcome {
    pub fn failures(&self) -> usize {
        self.directions
            .iter()
            .filter(|d| d.status == DirectionStatus::Failed)
            .count()
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

pub struct BundleOrchestrator {
    config: OrchestratorConfig,
    plans: Arc<dyn PlanSource>,
    generator: Arc<dyn GenerationProvider>,
    tools: Arc<dyn ToolProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Arc<dyn EventHandler>,
    stop: Arc<AtomicBool>,
}

impl BundleOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        plans: Arc<dyn PlanSource>,
        generator: Arc<dyn GenerationProvider>,
        tools: Arc<dyn ToolProvider>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            plans,
            generator,
            tools,
            artifacts,
            checkpoints: None,
            events: Arc::new(NoopHandler),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Arc::new(handler);
        self
    }

    /// Share an externally owned stop flag (e.g. set from a ctrl-c handler).
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run `bundle` under a fresh run id.
    pub async fn run(&self, bundle: &Bundle) -> Result<BundleOutcome> {
        self.run_with_id(bundle, &generate_run_id()).await
    }

    /// Run `bundle` under `run_id`, resuming from its checkpoints when any
    /// exist: finished directions are not rerun, the in-flight one continues
    /// from its last suspension point.
    pub async fn run_with_id(&self, bundle: &Bundle, run_id: &str) -> Result<BundleOutcome> {
        let queue = bundle.directions();
        if queue.is_empty() {
            return Err(ResearchError::EmptyBundle {
                bundle_id: bundle.bundle_id.clone(),
            });
        }

        let namespace = Namespace::bundle(&bundle.bundle_id, run_id);
        let restored = match self.checkpoints {
            Some(ref store) => load_state::<BundleState>(store.as_ref(), &namespace)?,
            None => None,
        };
        let mut state = match restored {
            Some(state) if state.direction_queue == queue => state,
            Some(_) => {
                warn!(
                    "[{}] checkpointed queue does not match the bundle, starting over",
                    bundle.bundle_id
                );
                BundleState::new(&bundle.bundle_id, run_id, queue)
            }
            None => BundleState::new(&bundle.bundle_id, run_id, queue),
        };

        self.events.on_event(&ResearchEvent::BundleStart {
            bundle_id: &bundle.bundle_id,
            run_id,
            directions: &state.direction_queue,
            start_index: state.direction_index,
        });

        let pending: Vec<(usize, DirectionType)> = state
            .direction_queue
            .iter()
            .copied()
            .enumerate()
            .skip(state.direction_index)
            .collect();
        let mut results = futures::stream::iter(pending)
            .map(|(index, direction)| async move {
                let result = self.run_direction(bundle, direction, run_id).await;
                (index, direction, result)
            })
            .buffered(self.config.concurrency.max(1));

        let mut cancelled = false;
        while let Some((index, direction, result)) = results.next().await {
            if cancelled {
                continue;
            }
            match result {
                Ok(result) => state.record_result(result),
                Err(ResearchError::Cancelled) => {
                    cancelled = true;
                    continue;
                }
                Err(error) => {
                    let reason = error.to_string();
                    self.events.on_event(&ResearchEvent::DirectionFailed {
                        bundle_id: &bundle.bundle_id,
                        direction,
                        error: &reason,
                    });
                    state.record_failure(direction, &error);
                }
            }
            state.direction_index = index + 1;
            self.checkpoint(&namespace, "direction", &state)?;
        }
        drop(results);

        if cancelled {
            info!(
                "[{}] run {run_id} cancelled at direction {}/{}",
                bundle.bundle_id,
                state.direction_index + 1,
                state.direction_queue.len()
            );
            return Err(ResearchError::Cancelled);
        }

        self.checkpoint(&namespace, "complete", &state)?;
        let outcome = state.outcome();
        self.events.on_event(&ResearchEvent::BundleComplete {
            bundle_id: &outcome.bundle_id,
            reports: outcome.final_reports.len(),
            failures: outcome.failures(),
        });
        Ok(outcome)
    }

    /// One direction, isolated: errors and panics come back as `Err`.
    async fn run_direction(
        &self,
        bundle: &Bundle,
        direction: DirectionType,
        run_id: &str,
    ) -> Result<DirectionResult> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(ResearchError::Cancelled);
        }
        let plan = self.plans.plan_for(bundle, direction)?;

        let mut agent = DirectionAgent::new(
            &self.config.agent,
            self.generator.as_ref(),
            self.tools.as_ref(),
            self.artifacts.as_ref(),
        )
        .with_event_handler(self.events.as_ref())
        .with_stop_signal(&self.stop);
        if let Some(ref store) = self.checkpoints {
            agent = agent.with_checkpoints(store.as_ref());
        }

        match AssertUnwindSafe(agent.run(bundle, plan, run_id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(ResearchError::Direction {
                direction,
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }

    fn checkpoint(&self, namespace: &Namespace, label: &str, state: &BundleState) -> Result<()> {
        if let Some(ref store) = self.checkpoints {
            save_state(store.as_ref(), namespace, label, state)?;
            let path = namespace.path();
            self.events.on_event(&ResearchEvent::CheckpointSaved {
                namespace: &path,
                label,
            });
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::checkpoint::{FileCheckpointStore, MemoryCheckpointStore};
    use crate::agent::config::AgentConfig;
    use crate::agent::events::FnEventHandler;
    use crate::api::retry::RetryConfig;
    use crate::bundle::Candidate;
    use crate::plan::{DirectionPlan, PlanFlags, RulePlanSource, StaticPlanSource};
    use crate::test_support::{ScriptedGenerator, ScriptedTools};
    use crate::tools::actions::Action;
    use crate::tools::artifacts::{FsArtifactStore, MemoryArtifactStore};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn config(concurrency: usize) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_concurrency(concurrency)
            .with_agent(
                AgentConfig::default()
                    .with_max_steps(2)
                    .with_retry(RetryConfig::immediate()),
            )
    }

    fn three_way_bundle() -> Bundle {
        Bundle::new("b1")
            .with_guest(Candidate::new("Dr. Example").with_url("https://podcast.example/ep1"))
            .with_candidate(DirectionType::Business, Candidate::new("Example Labs"))
            .with_candidate(DirectionType::Product, Candidate::new("Focus Blend"))
    }

    fn tools() -> ScriptedTools {
        ScriptedTools::new()
            .with_search(
                "dr example",
                "1. Dr. Example bio\n   https://podcast.example/bio\n   Neuroscientist",
            )
            .with_search(
                "example labs",
                "1. Example Labs\n   https://labs.example/\n   Supplement maker",
            )
            .with_search(
                "focus blend",
                "1. Focus Blend\n   https://shop.example/focus\n   $39 per tub",
            )
    }

    fn search(query: &str) -> Action {
        Action::Search {
            query: query.into(),
        }
    }

    fn scripted() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .with_action(DirectionType::Guest, search("dr example"))
            .with_action(DirectionType::Business, search("example labs"))
            .with_action(DirectionType::Product, search("focus blend"))
    }

    fn orchestrator(
        config: OrchestratorConfig,
        plans: Arc<dyn PlanSource>,
        generator: Arc<ScriptedGenerator>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> BundleOrchestrator {
        BundleOrchestrator::new(config, plans, generator, Arc::new(tools()), artifacts)
    }

    fn rules() -> Arc<dyn PlanSource> {
        Arc::new(RulePlanSource::new(PlanFlags::default()))
    }

    #[tokio::test]
    async fn product_only_bundle_runs_one_direction() {
        let bundle = Bundle::new("b1").with_candidate(DirectionType::Product, Candidate::new("Focus Blend"));
        let generator = Arc::new(scripted());
        let outcome = orchestrator(config(1), rules(), generator.clone(), Arc::new(MemoryArtifactStore::new()))
            .run(&bundle)
            .await
            .unwrap();

        assert_eq!(outcome.directions.len(), 1);
        assert_eq!(outcome.directions[0].direction, DirectionType::Product);
        assert!(outcome.final_reports.len() <= 1);
        assert!(
            generator
                .planning_requests()
                .iter()
                .all(|r| r.direction == DirectionType::Product)
        );
    }

    #[tokio::test]
    async fn empty_bundle_is_rejected() {
        let err = orchestrator(config(1), rules(), Arc::new(scripted()), Arc::new(MemoryArtifactStore::new()))
            .run(&Bundle::new("empty"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::EmptyBundle { .. }));
    }

    #[tokio::test]
    async fn panicking_direction_does_not_stop_siblings() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_action(DirectionType::Guest, search("dr example"))
                .with_plan_panic(DirectionType::Business)
                .with_action(DirectionType::Product, search("focus blend")),
        );
        let outcome = orchestrator(config(1), rules(), generator, Arc::new(MemoryArtifactStore::new()))
            .run(&three_way_bundle())
            .await
            .unwrap();

        let statuses: Vec<DirectionStatus> = outcome.directions.iter().map(|d| d.status).collect();
        assert_eq!(statuses[1], DirectionStatus::Failed);
        assert_ne!(statuses[0], DirectionStatus::Failed);
        assert_ne!(statuses[2], DirectionStatus::Failed);
        assert!(
            outcome.directions[1]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("panicked"))
        );
        assert_eq!(outcome.final_reports.len(), 2);
        assert!(outcome.final_reports.iter().any(|r| r.path.starts_with("b1/GUEST/")));
        assert!(outcome.final_reports.iter().any(|r| r.path.starts_with("b1/PRODUCT/")));
        assert!(outcome.notes.iter().any(|n| n.starts_with("BUSINESS failed")));
        assert_eq!(outcome.failures(), 1);
    }

    #[tokio::test]
    async fn missing_plan_fails_only_that_direction() {
        let plans: Arc<dyn PlanSource> = Arc::new(StaticPlanSource::new([
            DirectionPlan::new(DirectionType::Guest, ["identity"]),
            DirectionPlan::new(DirectionType::Product, ["price"]),
        ]));
        let outcome = orchestrator(config(1), plans, Arc::new(scripted()), Arc::new(MemoryArtifactStore::new()))
            .run(&three_way_bundle())
            .await
            .unwrap();

        let business = &outcome.directions[1];
        assert_eq!(business.status, DirectionStatus::Failed);
        assert!(business.error.as_deref().unwrap().contains("no plan available"));
        assert_eq!(outcome.final_reports.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_directions_write_disjoint_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
        let bundle = Bundle::new("b1")
            .with_guest(Candidate::new("Dr. Example"))
            .with_candidate(DirectionType::Product, Candidate::new("Focus Blend"));
        let outcome = orchestrator(config(2), rules(), Arc::new(scripted()), artifacts.clone())
            .run(&bundle)
            .await
            .unwrap();

        let prefix = |d: DirectionType| format!("b1/{}/{}/", d.as_str(), outcome.run_id);
        let guest: HashSet<FileRef> = artifacts
            .list(&prefix(DirectionType::Guest))
            .unwrap()
            .into_iter()
            .collect();
        let product: HashSet<FileRef> = artifacts
            .list(&prefix(DirectionType::Product))
            .unwrap()
            .into_iter()
            .collect();
        assert!(!guest.is_empty());
        assert!(!product.is_empty());
        assert!(guest.is_disjoint(&product));
        assert_eq!(guest.len() + product.len(), artifacts.list("b1/").unwrap().len());
        assert_eq!(outcome.final_reports.len(), 2);
    }

    #[tokio::test]
    async fn resume_after_cancellation_keeps_all_work() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")).unwrap());
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")).unwrap());
        let bundle = three_way_bundle();

        // Stop the run as soon as the first direction finishes.
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let first = orchestrator(config(1), rules(), Arc::new(scripted()), artifacts.clone())
            .with_checkpoints(checkpoints.clone())
            .with_stop_signal(stop)
            .with_event_handler(FnEventHandler::new(move |event| {
                if let ResearchEvent::DirectionComplete { .. } = event {
                    flag.store(true, Ordering::SeqCst);
                }
            }));
        let err = first.run_with_id(&bundle, "run-1").await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
        let before = artifacts.list("b1/").unwrap();
        assert!(!before.is_empty());

        let replay = Arc::new(scripted());
        let outcome = orchestrator(config(1), rules(), replay.clone(), artifacts.clone())
            .with_checkpoints(checkpoints.clone())
            .run_with_id(&bundle, "run-1")
            .await
            .unwrap();

        let after = artifacts.list("b1/").unwrap();
        assert!(before.iter().all(|f| after.contains(f)));
        let unique: HashSet<&FileRef> = after.iter().collect();
        assert_eq!(unique.len(), after.len());
        // GUEST finished before the stop and was not replanned.
        assert!(
            replay
                .planning_requests()
                .iter()
                .all(|r| r.direction != DirectionType::Guest)
        );
        assert_eq!(outcome.directions.len(), 3);
        assert_eq!(outcome.final_reports.len(), 3);

        // A third call finds the bundle complete and does no work at all.
        let idle = Arc::new(ScriptedGenerator::new());
        let again = orchestrator(config(1), rules(), idle.clone(), artifacts.clone())
            .with_checkpoints(checkpoints)
            .run_with_id(&bundle, "run-1")
            .await
            .unwrap();
        assert_eq!(again.final_reports, outcome.final_reports);
        assert!(idle.planning_requests().is_empty());
    }

    #[tokio::test]
    async fn bundle_checkpoint_tracks_queue_position() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let outcome = orchestrator(config(1), rules(), Arc::new(scripted()), Arc::new(MemoryArtifactStore::new()))
            .with_checkpoints(checkpoints.clone())
            .run_with_id(&three_way_bundle(), "run-9")
            .await
            .unwrap();

        let history = checkpoints.history(&Namespace::bundle("b1", "run-9"));
        let indexes: Vec<u64> = history
            .iter()
            .map(|r| r.state["direction_index"].as_u64().unwrap())
            .collect();
        assert_eq!(indexes, vec![1, 2, 3, 3]);
        assert_eq!(history.last().unwrap().label, "complete");
        assert_eq!(outcome.run_id, "run-9");
    }

    #[tokio::test]
    async fn lifecycle_events_are_emitted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        orchestrator(config(2), rules(), Arc::new(scripted()), Arc::new(MemoryArtifactStore::new()))
            .with_event_handler(FnEventHandler::new(move |event| {
                let name = match event {
                    ResearchEvent::BundleStart { .. } => "bundle_start",
                    ResearchEvent::DirectionStart { .. } => "direction_start",
                    ResearchEvent::DirectionComplete { .. } => "direction_complete",
                    ResearchEvent::BundleComplete { .. } => "bundle_complete",
                    _ => return,
                };
                sink.lock().unwrap().push(name);
            }))
            .run(&three_way_bundle())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&"bundle_start"));
        assert_eq!(seen.last(), Some(&"bundle_complete"));
        assert_eq!(seen.iter().filter(|e| **e == "direction_start").count(), 3);
        assert_eq!(seen.iter().filter(|e| **e == "direction_complete").count(), 3);
    }
}
