//! The per-direction research loop.
//!
//! [`DirectionAgent`] drives one [`DirectionAgentState`] through an explicit
//! state machine, one transition per [`DirectionAgent::step`] call:
//!
//! | Phase | Transition |
//! |-------|------------|
//! | `Init` | allocate the ledger from the plan → `Planning` |
//! | `Planning` | stop if the ledger is complete, the step cap is hit or the deadline passed (→ `Synthesizing`); otherwise compact history if needed, ask the planner, apply ledger updates → `Acting` (or `Synthesizing` on `complete`) |
//! | `Acting` | run exactly one action, compress external output, count the step, checkpoint → `Planning` |
//! | `Synthesizing` | write the final report from notes and summaries (or record why none could be produced) → `Done` |
//! | `Done` | terminal, checkpointed |
//!
//! Tool errors, timeouts, planning failures and synthesis failures are
//! recorded as notes and never leave the loop. Only structural problems,
//! checkpoint I/O and cancellation return `Err`.
//!
//! # Resume
//!
//! [`DirectionAgent::run`] first loads the latest checkpoint of the
//! direction's namespace. A `Done` state is returned as is; any other state
//! continues from its phase, so tool calls completed before the checkpoint
//! are never repeated.

use crate::agent::checkpoint::{CheckpointStore, Namespace, load_state, save_state};
use crate::agent::config::AgentConfig;
use crate::agent::events::{EventHandler, NoopHandler, ResearchEvent};
use crate::agent::ledger::{FieldStatus, Ledger};
use crate::agent::prompt::{
    framing_message, planning_system_prompt, synthesis_material, synthesis_system_prompt,
};
use crate::agent::state::{DirectionAgentState, DirectionResult, Phase, Termination};
use crate::api::retry::{is_transient_error, retry_generation};
use crate::api::{GenerationProvider, PlanningRequest, SynthesisRequest};
use crate::bundle::Bundle;
use crate::context::window::{Compaction, Turn};
use crate::error::{ResearchError, Result};
use crate::plan::DirectionPlan;
use crate::tools::actions::{Action, PlanDecision};
use crate::tools::artifacts::{ArtifactStore, FileRef, sanitize_segment};
use crate::tools::compress::{Compressor, ResultKind};
use crate::tools::provider::ToolProvider;
use crate::{Message, char_len, truncate_chars};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct DirectionAgent<'a> {
    config: &'a AgentConfig,
    generator: &'a dyn GenerationProvider,
    tools: &'a dyn ToolProvider,
    artifacts: &'a dyn ArtifactStore,
    checkpoints: Option<&'a dyn CheckpointStore>,
    events: &'a dyn EventHandler,
    stop: Option<&'a AtomicBool>,
}

impl<'a> DirectionAgent<'a> {
    pub fn new(
        config: &'a AgentConfig,
        generator: &'a dyn GenerationProvider,
        tools: &'a dyn ToolProvider,
        artifacts: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            config,
            generator,
            tools,
            artifacts,
            checkpoints: None,
            events: &NoopHandler,
            stop: None,
        }
    }

    /// Persist state at every suspension point and resume from it.
    pub fn with_checkpoints(mut self, store: &'a dyn CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_event_handler(mut self, events: &'a dyn EventHandler) -> Self {
        self.events = events;
        self
    }

    /// Checked between state-machine steps, never mid tool call.
    pub fn with_stop_signal(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    fn emit(&self, event: ResearchEvent<'_>) {
        self.events.on_event(&event);
    }

    fn is_cancelled(&self) -> bool {
        self.stop.is_some_and(|s| s.load(Ordering::SeqCst))
    }

    /// Run (or resume) the direction `plan.direction` of `bundle` to `Done`.
    pub async fn run(
        &self,
        bundle: &Bundle,
        plan: DirectionPlan,
        run_id: &str,
    ) -> Result<DirectionResult> {
        plan.validate()?;
        let direction = plan.direction;
        let namespace = Namespace::direction(&bundle.bundle_id, direction, run_id);

        let restored = match self.checkpoints {
            Some(store) => load_state::<DirectionAgentState>(store, &namespace)?,
            None => None,
        };
        let resumed_at_step = restored.as_ref().map(|s| s.steps_taken);
        let mut state = restored.unwrap_or_else(|| {
            DirectionAgentState::new(
                &bundle.bundle_id,
                run_id,
                plan,
                self.config.context.clone(),
            )
        });

        self.emit(ResearchEvent::DirectionStart {
            bundle_id: &bundle.bundle_id,
            direction,
            run_id,
            resumed_at_step,
        });

        let deadline = self.config.direction_timeout().map(|t| Instant::now() + t);
        while !state.is_done() {
            if self.is_cancelled() {
                info!("[{direction}] cancelled at step {}", state.steps_taken);
                return Err(ResearchError::Cancelled);
            }
            self.step(&mut state, bundle, deadline).await?;
        }

        let result = state.result();
        let unresolved = result.unresolved_fields();
        self.emit(ResearchEvent::DirectionComplete {
            bundle_id: &bundle.bundle_id,
            direction,
            report: result.final_report.as_ref(),
            unresolved: &unresolved,
        });
        Ok(result)
    }

    /// Execute exactly one state-machine transition.
    pub async fn step(
        &self,
        state: &mut DirectionAgentState,
        bundle: &Bundle,
        deadline: Option<Instant>,
    ) -> Result<()> {
        match state.phase {
            Phase::Init => {
                state.ledger = Ledger::init(state.plan.required_fields.clone());
                state.phase = Phase::Planning;
            }
            Phase::Planning => self.plan_step(state, bundle, deadline).await?,
            Phase::Acting => self.act(state).await?,
            Phase::Synthesizing => self.synthesize(state).await?,
            Phase::Done => {}
        }
        Ok(())
    }

    // ── Planning ───────────────────────────────────────────────────

    fn termination(
        &self,
        state: &DirectionAgentState,
        deadline: Option<Instant>,
    ) -> Option<Termination> {
        if state.ledger.is_complete() {
            Some(Termination::LedgerComplete)
        } else if state.steps_taken >= self.config.max_steps {
            Some(Termination::StepCap)
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Termination::Deadline)
        } else {
            None
        }
    }

    async fn plan_step(
        &self,
        state: &mut DirectionAgentState,
        bundle: &Bundle,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let direction = state.direction;
        if let Some(termination) = self.termination(state, deadline) {
            if termination == Termination::StepCap {
                self.emit(ResearchEvent::StepCapReached {
                    direction,
                    max_steps: self.config.max_steps,
                });
            }
            debug!("[{direction}] research ended: {}", termination.as_str());
            state.termination = Some(termination);
            state.phase = Phase::Synthesizing;
            return Ok(());
        }

        if state.history.should_compact() {
            let outcome = state
                .history
                .compact(self.generator, &self.config.retry)
                .await;
            self.emit(ResearchEvent::Compaction {
                direction,
                outcome: &outcome,
            });
            if let Compaction::Dropped {
                discarded_turns,
                error,
                ..
            } = outcome
            {
                state.note(format!(
                    "step {}: dropped {discarded_turns} history turn(s) without a summary: {error}",
                    state.steps_taken
                ));
            }
        }

        let step = state.steps_taken + 1;
        self.emit(ResearchEvent::StepStart {
            direction,
            step,
            max_steps: self.config.max_steps,
            usage: state.history.usage(),
        });

        let mut messages = state.history.to_messages();
        messages.push(Message::user(framing_message(state, self.config.max_steps)));
        let request = PlanningRequest {
            direction,
            system: planning_system_prompt(state, bundle),
            messages,
        };
        let decision = retry_generation(&self.config.retry, "planning", || {
            self.generator.plan(&request)
        })
        .await;
        state.framing = state.framing.advance();

        match decision {
            Ok(decision) => self.apply_decision(state, decision),
            Err(error) => {
                // A failed planning call still costs a step so the cap bounds the loop.
                self.emit(ResearchEvent::PlanningFailed {
                    direction,
                    step,
                    error: &error,
                });
                let note = format!("step {step}: planning failed: {error}");
                state.history.append(Turn::note(step, note.clone()));
                state.note(note);
                state.steps_taken = step;
                self.checkpoint(state, "planning_failed")?;
            }
        }
        Ok(())
    }

    fn apply_decision(&self, state: &mut DirectionAgentState, decision: PlanDecision) {
        let direction = state.direction;
        let step = state.steps_taken + 1;

        for update in &decision.ledger_updates {
            let evidence: Vec<FileRef> = update
                .evidence
                .iter()
                .map(|p| FileRef::new(p.as_str()))
                .filter(|r| state.file_refs.contains(r))
                .collect();
            match state.ledger.update(
                &update.field,
                update.status,
                &evidence,
                update.notes.as_deref(),
            ) {
                Ok(change) if !change.is_noop() => self.emit(ResearchEvent::LedgerUpdated {
                    direction,
                    field: &update.field,
                    from: change.from,
                    to: change.to,
                }),
                Ok(_) => {}
                Err(e) => state.note(format!("step {step}: ignored ledger update: {e}")),
            }
        }
        if decision.focus.is_some() {
            state.current_focus = decision.focus.clone();
        }
        state.open_questions = decision.open_questions.clone();
        state.history.append(Turn::model(step, decision.describe()));

        match decision.action {
            Action::Complete { reason } => {
                let note = format!("closed at completion: {reason}");
                for field in state.ledger.unresolved_fields() {
                    if let Ok(change) =
                        state
                            .ledger
                            .update(&field, FieldStatus::NotFound, &[], Some(note.as_str()))
                    {
                        self.emit(ResearchEvent::LedgerUpdated {
                            direction,
                            field: &field,
                            from: change.from,
                            to: change.to,
                        });
                    }
                }
                info!("[{direction}] planner completed the direction: {reason}");
                state.termination = Some(Termination::LedgerComplete);
                state.phase = Phase::Synthesizing;
            }
            action if state.ledger.is_complete() => {
                debug!(
                    "[{direction}] ledger complete, skipping {} ({})",
                    action.name(),
                    action.argument()
                );
                state.termination = Some(Termination::LedgerComplete);
                state.phase = Phase::Synthesizing;
            }
            action => {
                state.pending_action = Some(action);
                state.phase = Phase::Acting;
            }
        }
    }

    // ── Acting ─────────────────────────────────────────────────────

    async fn act(&self, state: &mut DirectionAgentState) -> Result<()> {
        let Some(action) = state.pending_action.take() else {
            state.phase = Phase::Planning;
            return Ok(());
        };
        let step = state.steps_taken + 1;
        self.emit(ResearchEvent::ToolInvoked {
            direction: state.direction,
            tool: action.name(),
            argument: action.argument(),
        });

        match &action {
            Action::Search { query } => {
                self.run_external(state, step, ResultKind::Search, query)
                    .await
            }
            Action::Extract { url } => {
                self.run_external(state, step, ResultKind::Extract, url)
                    .await
            }
            Action::WriteNote { title, content } => self.write_note(state, step, title, content),
            Action::Complete { .. } => {
                state.phase = Phase::Planning;
                return Ok(());
            }
        }

        state.steps_taken = step;
        state.phase = Phase::Planning;
        self.checkpoint(state, "acting")
    }

    /// Search or extract with a bounded wait, retrying a transient failure once.
    async fn call_tool(&self, kind: ResultKind, argument: &str) -> std::result::Result<String, String> {
        let timeout = self.config.tool_timeout();
        let mut retried = false;
        loop {
            let call = match kind {
                ResultKind::Search => self.tools.search(argument),
                ResultKind::Extract => self.tools.extract(argument),
            };
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(format!(
                        "{} timed out after {}s",
                        kind.as_str(),
                        timeout.as_secs()
                    ));
                }
            };
            match result {
                Err(e) if !retried && is_transient_error(&e) => {
                    debug!("{} '{argument}' failed transiently, retrying: {e}", kind.as_str());
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn run_external(
        &self,
        state: &mut DirectionAgentState,
        step: u32,
        kind: ResultKind,
        argument: &str,
    ) {
        let direction = state.direction;
        let raw = match self.call_tool(kind, argument).await {
            Ok(raw) => raw,
            Err(error) => {
                self.emit(ResearchEvent::ToolFailed {
                    direction,
                    tool: kind.as_str(),
                    error: &error,
                });
                let note = format!("step {step}: {} '{argument}' failed: {error}", kind.as_str());
                state.history.append(Turn::tool(step, note.clone()));
                state.note(note);
                return;
            }
        };

        let raw_path = state.artifact_path(&format!("raw/step-{step:03}-{}.txt", kind.as_str()));
        let compressor = Compressor::new(
            &self.config.compressor,
            &self.config.retry,
            self.generator,
            self.artifacts,
        );
        let summary = compressor.compress(&raw, kind, &raw_path).await;
        let rendered = summary.render();
        self.emit(ResearchEvent::Compressed {
            direction,
            kind,
            raw_chars: char_len(&raw),
            summary_chars: char_len(&summary.summary_text),
            degraded: summary.degraded,
        });

        if let Some(raw_ref) = summary.raw_ref.clone() {
            state.record_file(raw_ref);
        }
        if summary.degraded {
            state.note(format!(
                "step {step}: {} result for '{argument}' truncated, summarizer unavailable",
                kind.as_str()
            ));
        }

        let summary_path =
            state.artifact_path(&format!("summaries/step-{step:03}-{}.md", kind.as_str()));
        let body = format!("# {} `{argument}`\n\n{rendered}\n", kind.as_str());
        let mut turn = format!("{} '{argument}':\n{rendered}", kind.as_str());
        match self.artifacts.write_artifact(&summary_path, &body) {
            Ok(file) => {
                turn.push_str(&format!("\nSummary saved at {file}"));
                state.record_file(file);
            }
            Err(e) => {
                warn!("[{direction}] Failed to save summary: {e}");
                state.note(format!("step {step}: summary not saved: {e}"));
            }
        }
        state.history.append(Turn::tool(step, turn));
    }

    fn write_note(&self, state: &mut DirectionAgentState, step: u32, title: &str, content: &str) {
        let slug = sanitize_segment(&title.to_lowercase());
        let path = state.artifact_path(&format!(
            "notes/step-{step:03}-{}.md",
            truncate_chars(&slug, 48)
        ));
        match self
            .artifacts
            .write_artifact(&path, &format!("# {title}\n\n{}\n", content.trim()))
        {
            Ok(file) => {
                state
                    .history
                    .append(Turn::tool(step, format!("Note '{title}' saved at {file}")));
                state.record_file(file);
            }
            Err(error) => {
                self.emit(ResearchEvent::ToolFailed {
                    direction: state.direction,
                    tool: "write_note",
                    error: &error,
                });
                let note = format!("step {step}: note '{title}' not saved: {error}");
                state.history.append(Turn::tool(step, note.clone()));
                state.note(note);
            }
        }
    }

    // ── Synthesizing ───────────────────────────────────────────────

    async fn synthesize(&self, state: &mut DirectionAgentState) -> Result<()> {
        let mut blocks: Vec<(&str, String)> = Vec::new();
        let mut unreadable = Vec::new();
        for file in state.file_refs.iter().filter(|f| is_material(f)) {
            match self.artifacts.read_artifact(file) {
                Ok(content) => blocks.push((file.path.as_str(), content)),
                Err(e) => unreadable.push(format!("{file}: {e}")),
            }
        }
        let material = truncate_chars(
            &synthesis_material(blocks),
            self.config.context.max_chars,
        )
        .to_string();
        for e in unreadable {
            state.note(format!("synthesis skipped unreadable artifact {e}"));
        }

        let report = if material.is_empty() {
            Err("no notes or compressed results were written".to_string())
        } else {
            let request = SynthesisRequest {
                system: synthesis_system_prompt(state),
                material,
            };
            retry_generation(&self.config.retry, "synthesis", || {
                self.generator.synthesize(&request)
            })
            .await
            .and_then(|text| {
                let text = text.trim();
                if text.is_empty() {
                    Err("synthesis returned empty text".to_string())
                } else {
                    Ok(text.to_string())
                }
            })
        };

        let written = report.and_then(|text| {
            let ended = state.termination.map_or("unknown", |t| t.as_str());
            let body = format!(
                "{text}\n\n## Requirement ledger\n\nResearch ended: {ended} after {} step(s).\n\n{}",
                state.steps_taken,
                state.ledger.render()
            );
            self.artifacts
                .write_artifact(&state.artifact_path("report.md"), &body)
        });

        match written {
            Ok(file) => {
                state.record_file(file.clone());
                state.final_report = Some(file);
            }
            Err(reason) => {
                self.emit(ResearchEvent::SynthesisDegraded {
                    direction: state.direction,
                    reason: &reason,
                });
                state.note(format!("no report could be produced: {reason}"));
                state.final_report = None;
            }
        }

        state.phase = Phase::Done;
        self.checkpoint(state, "done")
    }

    // ── Checkpoints ────────────────────────────────────────────────

    fn checkpoint(&self, state: &DirectionAgentState, label: &str) -> Result<()> {
        let Some(store) = self.checkpoints else {
            return Ok(());
        };
        let record = save_state(store, &state.namespace(), label, state)?;
        let namespace = record.namespace.path();
        self.emit(ResearchEvent::CheckpointSaved {
            namespace: &namespace,
            label,
        });
        Ok(())
    }
}

/// Notes and compressed summaries feed synthesis; raw archives do not.
fn is_material(file: &FileRef) -> bool {
    file.path.contains("/notes/") || file.path.contains("/summaries/")
}
