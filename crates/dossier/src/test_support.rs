//! Scripted collaborators for unit and scenario tests.

use crate::api::{
    GenFuture, GenerationProvider, PlanningRequest, SourceRef, Summary, SummaryRequest,
    SynthesisRequest,
};
use crate::bundle::DirectionType;
use crate::tools::actions::{Action, PlanDecision};
use crate::tools::provider::{ToolFuture, ToolProvider};
use crate::truncate_chars;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted planner answer.
#[derive(Debug, Clone)]
pub enum PlanReply {
    Decision(PlanDecision),
    Fail(String),
    /// Simulates a catastrophic bug inside the direction.
    Panic,
}

/// Generation provider that replays queued answers.
///
/// Planning replies are queued per direction so concurrent directions stay
/// deterministic. An exhausted plan queue answers `complete`; an exhausted
/// summary queue answers with a short digest of the request.
#[derive(Default)]
pub struct ScriptedGenerator {
    plans: Mutex<HashMap<DirectionType, VecDeque<PlanReply>>>,
    summaries: Mutex<VecDeque<Summary>>,
    reports: Mutex<VecDeque<String>>,
    fail_summaries: bool,
    fail_synthesis: bool,
    planning_requests: Mutex<Vec<PlanningRequest>>,
    summary_requests: Mutex<Vec<String>>,
    synthesis_requests: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, direction: DirectionType, decision: PlanDecision) -> Self {
        self.push_plan(direction, PlanReply::Decision(decision))
    }

    pub fn with_action(self, direction: DirectionType, action: Action) -> Self {
        self.with_plan(direction, PlanDecision::new(action))
    }

    pub fn with_plan_failure(self, direction: DirectionType, error: &str) -> Self {
        self.push_plan(direction, PlanReply::Fail(error.to_string()))
    }

    pub fn with_plan_panic(self, direction: DirectionType) -> Self {
        self.push_plan(direction, PlanReply::Panic)
    }

    fn push_plan(self, direction: DirectionType, reply: PlanReply) -> Self {
        if let Ok(mut plans) = self.plans.lock() {
            plans.entry(direction).or_default().push_back(reply);
        }
        self
    }

    pub fn with_summary(self, text: impl Into<String>) -> Self {
        self.with_summary_and_sources(text, Vec::new())
    }

    pub fn with_summary_and_sources(self, text: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        if let Ok(mut summaries) = self.summaries.lock() {
            summaries.push_back(Summary {
                text: text.into(),
                sources,
            });
        }
        self
    }

    pub fn with_report(self, text: impl Into<String>) -> Self {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push_back(text.into());
        }
        self
    }

    pub fn failing_summaries(mut self) -> Self {
        self.fail_summaries = true;
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    pub fn planning_requests(&self) -> Vec<PlanningRequest> {
        self.planning_requests.lock().unwrap().clone()
    }

    pub fn summary_requests(&self) -> Vec<String> {
        self.summary_requests.lock().unwrap().clone()
    }

    pub fn synthesis_requests(&self) -> Vec<String> {
        self.synthesis_requests.lock().unwrap().clone()
    }
}

impl GenerationProvider for ScriptedGenerator {
    fn plan<'a>(&'a self, request: &'a PlanningRequest) -> GenFuture<'a, PlanDecision> {
        self.planning_requests.lock().unwrap().push(request.clone());
        let reply = self
            .plans
            .lock()
            .unwrap()
            .get_mut(&request.direction)
            .and_then(VecDeque::pop_front);
        Box::pin(async move {
            match reply {
                Some(PlanReply::Decision(d)) => Ok(d),
                Some(PlanReply::Fail(e)) => Err(e),
                Some(PlanReply::Panic) => panic!("scripted planner panic"),
                None => Ok(PlanDecision::new(Action::Complete {
                    reason: "script exhausted".into(),
                })),
            }
        })
    }

    fn synthesize<'a>(&'a self, request: &'a SynthesisRequest) -> GenFuture<'a, String> {
        self.synthesis_requests
            .lock()
            .unwrap()
            .push(request.material.clone());
        let scripted = self.reports.lock().unwrap().pop_front();
        let fail = self.fail_synthesis;
        let chars = request.material.chars().count();
        Box::pin(async move {
            if fail {
                return Err("OpenRouter API HTTP 503: synthesis unavailable".into());
            }
            Ok(scripted.unwrap_or_else(|| format!("Report written from {chars} chars of material.")))
        })
    }

    fn summarize<'a>(&'a self, request: &'a SummaryRequest) -> GenFuture<'a, Summary> {
        self.summary_requests
            .lock()
            .unwrap()
            .push(request.text.clone());
        let scripted = self.summaries.lock().unwrap().pop_front();
        let fail = self.fail_summaries;
        Box::pin(async move {
            if fail {
                return Err("OpenRouter API HTTP 503: summarizer unavailable".into());
            }
            Ok(scripted.unwrap_or_else(|| Summary {
                text: format!("Digest: {}", truncate_chars(&request.text, 120)),
                sources: Vec::new(),
            }))
        })
    }
}

/// Tool provider answering from fixed tables.
#[derive(Default)]
pub struct ScriptedTools {
    searches: HashMap<String, Result<String, String>>,
    pages: HashMap<String, Result<String, String>>,
    /// Failures returned before the scripted answer, per argument.
    transient: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, query: &str, result: impl Into<String>) -> Self {
        self.searches.insert(query.to_string(), Ok(result.into()));
        self
    }

    pub fn with_page(mut self, url: &str, text: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), Ok(text.into()));
        self
    }

    pub fn with_failing_page(mut self, url: &str, error: &str) -> Self {
        self.pages.insert(url.to_string(), Err(error.to_string()));
        self
    }

    /// Fail `times` times with a transient error before answering.
    pub fn with_transient_failures(self, argument: &str, times: u32) -> Self {
        if let Ok(mut transient) = self.transient.lock() {
            transient.insert(argument.to_string(), times);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every invocation as `search:{query}` or `extract:{url}`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer<'a>(
        &'a self,
        kind: &'static str,
        argument: &'a str,
        table: &'a HashMap<String, Result<String, String>>,
    ) -> ToolFuture<'a> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{kind}:{argument}"));
        let transient = {
            let mut pending = self.transient.lock().unwrap();
            match pending.get_mut(argument) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if transient {
                return Err("request failed: connection reset".into());
            }
            table
                .get(argument)
                .cloned()
                .unwrap_or_else(|| Err(format!("No results for '{argument}'")))
        })
    }
}

impl ToolProvider for ScriptedTools {
    fn search<'a>(&'a self, query: &'a str) -> ToolFuture<'a> {
        self.answer("search", query, &self.searches)
    }

    fn extract<'a>(&'a self, url: &'a str) -> ToolFuture<'a> {
        self.answer("extract", url, &self.pages)
    }
}
