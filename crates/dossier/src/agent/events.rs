//! Lifecycle events emitted by the orchestrator and direction agents.
//!
//! Events are telemetry only: handlers observe, they cannot steer the run,
//! and a run with [`NoopHandler`] behaves exactly like one with a full
//! handler chain.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::agent::ledger::FieldStatus;
use crate::bundle::DirectionType;
use crate::context::budget::ContextUsage;
use crate::context::window::Compaction;
use crate::tools::artifacts::FileRef;
use crate::tools::compress::ResultKind;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ResearchEvent<'a> {
    /// A bundle run is starting (or resuming at `start_index`).
    BundleStart {
        bundle_id: &'a str,
        run_id: &'a str,
        directions: &'a [DirectionType],
        start_index: usize,
    },
    /// A direction agent is starting. `resumed_at_step` is set when its
    /// state came from a checkpoint.
    DirectionStart {
        bundle_id: &'a str,
        direction: DirectionType,
        run_id: &'a str,
        resumed_at_step: Option<u32>,
    },
    /// A planning step is about to run.
    StepStart {
        direction: DirectionType,
        step: u32,
        max_steps: u32,
        usage: ContextUsage,
    },
    ToolInvoked {
        direction: DirectionType,
        tool: &'a str,
        argument: &'a str,
    },
    /// A tool call failed or timed out; the loop continues.
    ToolFailed {
        direction: DirectionType,
        tool: &'a str,
        error: &'a str,
    },
    Compressed {
        direction: DirectionType,
        kind: ResultKind,
        raw_chars: usize,
        summary_chars: usize,
        degraded: bool,
    },
    Compaction {
        direction: DirectionType,
        outcome: &'a Compaction,
    },
    LedgerUpdated {
        direction: DirectionType,
        field: &'a str,
        from: FieldStatus,
        to: FieldStatus,
    },
    /// Planning failed after retries; the step was consumed.
    PlanningFailed {
        direction: DirectionType,
        step: u32,
        error: &'a str,
    },
    StepCapReached {
        direction: DirectionType,
        max_steps: u32,
    },
    CheckpointSaved {
        namespace: &'a str,
        label: &'a str,
    },
    /// Synthesis failed or had nothing to work from.
    SynthesisDegraded {
        direction: DirectionType,
        reason: &'a str,
    },
    DirectionComplete {
        bundle_id: &'a str,
        direction: DirectionType,
        report: Option<&'a FileRef>,
        unresolved: &'a [String],
    },
    /// A direction raised instead of returning; siblings still run.
    DirectionFailed {
        bundle_id: &'a str,
        direction: DirectionType,
        error: &'a str,
    },
    BundleComplete {
        bundle_id: &'a str,
        reports: usize,
        failures: usize,
    },
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer for [`ResearchEvent`]s. Shared by concurrently running
/// directions, hence `Send + Sync`.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// # Example
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ResearchEvent::DirectionComplete { direction, .. } = event {
///         println!("{direction} done");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ResearchEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(json_progress, JsonProgressHandler::stdout());
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events through `tracing`: lifecycle at `info`, per-step detail at
/// `debug`, degraded paths at `warn`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        match event {
            ResearchEvent::BundleStart {
                bundle_id,
                run_id,
                directions,
                start_index,
            } => {
                let queue: Vec<&str> = directions.iter().map(|d| d.as_str()).collect();
                if *start_index > 0 {
                    info!(
                        "[{bundle_id}] resuming run {run_id} at direction {}/{}: [{}]",
                        start_index + 1,
                        directions.len(),
                        queue.join(", ")
                    );
                } else {
                    info!("[{bundle_id}] run {run_id}: [{}]", queue.join(", "));
                }
            }
            ResearchEvent::DirectionStart {
                bundle_id,
                direction,
                resumed_at_step,
                ..
            } => match resumed_at_step {
                Some(step) => info!("[{bundle_id}/{direction}] resuming after step {step}"),
                None => info!("[{bundle_id}/{direction}] starting"),
            },
            ResearchEvent::StepStart {
                direction,
                step,
                max_steps,
                usage,
            } => {
                debug!(
                    "[{direction}] step {step}/{max_steps}, {}",
                    usage.to_log_string()
                );
            }
            ResearchEvent::ToolInvoked {
                direction,
                tool,
                argument,
            } => {
                let preview: String = argument.chars().take(120).collect();
                info!("[{direction}] {tool}: {preview}");
            }
            ResearchEvent::ToolFailed {
                direction,
                tool,
                error,
            } => {
                warn!("[{direction}] {tool} failed: {error}");
            }
            ResearchEvent::Compressed {
                direction,
                kind,
                raw_chars,
                summary_chars,
                degraded,
            } => {
                if *degraded {
                    warn!(
                        "[{direction}] {} result truncated ({raw_chars} -> {summary_chars} chars, summarizer unavailable)",
                        kind.as_str()
                    );
                } else {
                    debug!(
                        "[{direction}] {} result compressed {raw_chars} -> {summary_chars} chars",
                        kind.as_str()
                    );
                }
            }
            ResearchEvent::Compaction { direction, outcome } => match outcome {
                Compaction::Skipped => debug!("[{direction}] compaction skipped"),
                Compaction::Summarized {
                    discarded_turns,
                    freed_chars,
                } => info!(
                    "[{direction}] history compacted: {discarded_turns} turn(s), {freed_chars} chars freed"
                ),
                Compaction::Dropped {
                    discarded_turns,
                    error,
                    ..
                } => warn!(
                    "[{direction}] history summary failed, dropped {discarded_turns} turn(s): {error}"
                ),
            },
            ResearchEvent::LedgerUpdated {
                direction,
                field,
                from,
                to,
            } => {
                if from.is_resolved() && !to.is_resolved() {
                    info!("[{direction}] ledger regression: {field} {from} -> {to}");
                } else {
                    debug!("[{direction}] ledger: {field} {from} -> {to}");
                }
            }
            ResearchEvent::PlanningFailed {
                direction,
                step,
                error,
            } => {
                warn!("[{direction}] planning failed at step {step}: {error}");
            }
            ResearchEvent::StepCapReached {
                direction,
                max_steps,
            } => {
                info!("[{direction}] step cap reached ({max_steps}), synthesizing");
            }
            ResearchEvent::CheckpointSaved { namespace, label } => {
                debug!("checkpoint {namespace} ({label})");
            }
            ResearchEvent::SynthesisDegraded { direction, reason } => {
                warn!("[{direction}] no report produced: {reason}");
            }
            ResearchEvent::DirectionComplete {
                bundle_id,
                direction,
                report,
                unresolved,
            } => {
                let report = report.map_or("none".to_string(), |r| r.to_string());
                if unresolved.is_empty() {
                    info!("[{bundle_id}/{direction}] complete, report: {report}");
                } else {
                    info!(
                        "[{bundle_id}/{direction}] complete with unresolved [{}], report: {report}",
                        unresolved.join(", ")
                    );
                }
            }
            ResearchEvent::DirectionFailed {
                bundle_id,
                direction,
                error,
            } => {
                warn!("[{bundle_id}/{direction}] failed: {error}");
            }
            ResearchEvent::BundleComplete {
                bundle_id,
                reports,
                failures,
            } => {
                info!("[{bundle_id}] bundle complete: {reports} report(s), {failures} failure(s)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> ResearchEvent<'static> {
        ResearchEvent::BundleComplete {
            bundle_id: "b1",
            reports: 2,
            failures: 1,
        }
    }

    #[test]
    fn composite_dispatches_to_all() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            }))
            .with(NoopHandler)
            .with(FnEventHandler::new(move |_| {
                c2.fetch_add(10, Ordering::SeqCst);
            }));
        handler.on_event(&sample());
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn with_if_and_with_opt_skip() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler = CompositeEventHandler::new()
            .with_if(
                false,
                FnEventHandler::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .with_opt(None::<NoopHandler>);
        handler.on_event(&sample());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn logging_handler_accepts_every_variant() {
        let refs = [FileRef::new("b/GUEST/r/report.md")];
        let unresolved = vec!["price".to_string()];
        let events = [
            ResearchEvent::DirectionComplete {
                bundle_id: "b",
                direction: DirectionType::Guest,
                report: refs.first(),
                unresolved: &unresolved,
            },
            ResearchEvent::LedgerUpdated {
                direction: DirectionType::Product,
                field: "price",
                from: FieldStatus::Done,
                to: FieldStatus::InProgress,
            },
            ResearchEvent::Compaction {
                direction: DirectionType::Product,
                outcome: &Compaction::Skipped,
            },
        ];
        for e in &events {
            LoggingHandler.on_event(e);
        }
    }
}
