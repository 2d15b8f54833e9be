//! The bounded THINK → ACT → OBSERVE loop.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::brain::{Decision, DecisionMaker};
use crate::executor::Executor;
use crate::prompt;
use crate::registry::{self, ToolCall, ToolName};
use crate::retry::{RetryPolicy, with_retry};
use crate::state::{EntryKind, HistoryEntry, OrchestratorState};
use crate::types::{ActionResult, Status, ToolArgs, truncate_chars};

const HISTORY_SUMMARY_CHARS: usize = 200;
const RECOVERY_SUMMARY_CHARS: usize = 300;
const RECOVERY_QUESTION: &str = "Based on the current page, list clickable items in the UI and panels. \
Provide a prioritized sequence of what to click next to investigate the task. \
Include exact visible text for each item.";

/// Loop limits. The thresholds are empirical and environment-dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// History entries included in each prompt.
    pub history_window: usize,
    /// Consecutive analysis actions that trigger a forced scroll.
    pub stuck_threshold: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            history_window: 10,
            stuck_threshold: 3,
        }
    }
}

/// Progress notifications for observers such as the web console.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Thinking,
    Step { number: usize, description: String },
    StepError { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Thinking => "thinking",
            AgentEvent::Step { .. } => "step",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready => "ready",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            AgentEvent::Step {
                number,
                description,
            } => json!({"number": number, "description": description}),
            AgentEvent::StepError { message } | AgentEvent::TaskError { message } => {
                json!({"message": message})
            }
            AgentEvent::TaskComplete { summary } => json!({"summary": summary}),
            AgentEvent::Thinking | AgentEvent::Ready => json!({}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The decision-maker declared the task complete.
    Done,
    /// Step budget exhausted; the report is a best-effort page description.
    Timeout,
    /// The decision-maker could not be reached within its retry budget.
    Failed,
}

/// Structured result of one task. Never an `Err`.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub report: String,
    /// Loop iterations consumed.
    pub steps: usize,
    pub state: OrchestratorState,
}

pub struct Orchestrator {
    executor: Executor,
    brain: Arc<dyn DecisionMaker>,
    config: AgentConfig,
    retry: RetryPolicy,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl Orchestrator {
    pub fn new(
        executor: Executor,
        brain: Arc<dyn DecisionMaker>,
        config: AgentConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            brain,
            config,
            retry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Direct access to the executor, for single remote tool calls between tasks.
    pub fn executor_mut(&mut self) -> &mut Executor {
        &mut self.executor
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    pub async fn run(&mut self, task: &str) -> Outcome {
        info!("Running task: {}", truncate_chars(task.trim(), 200));
        let outcome = self.run_loop(task).await;
        match outcome.status {
            OutcomeStatus::Done => {
                info!("Task complete after {} steps", outcome.steps);
                self.emit(AgentEvent::TaskComplete {
                    summary: outcome.report.clone(),
                });
            }
            OutcomeStatus::Timeout | OutcomeStatus::Failed => {
                self.emit(AgentEvent::TaskError {
                    message: outcome.report.clone(),
                });
            }
        }
        self.emit(AgentEvent::Ready);
        outcome
    }

    async fn run_loop(&mut self, task: &str) -> Outcome {
        let mut state = OrchestratorState::new(self.config.stuck_threshold);
        let max_steps = self.config.max_steps;
        let mut steps = 0;

        while steps < max_steps {
            steps += 1;
            let step = steps;
            info!("Step {}/{}", step, max_steps);

            // THINK
            self.emit(AgentEvent::Thinking);
            let prompt = prompt::build(task, &state, self.config.history_window);
            let brain = Arc::clone(&self.brain);
            let decision = with_retry(&self.retry, "decision-maker", || brain.decide(&prompt)).await;

            let (name, args, reason) = match decision {
                Err(e) => {
                    error!("Decision-maker unavailable: {}", e);
                    return Outcome {
                        status: OutcomeStatus::Failed,
                        report: format!("Decision-maker failed after retries: {}", e),
                        steps,
                        state,
                    };
                }
                Ok(Decision::Done { summary }) => {
                    state.push(HistoryEntry::new(
                        step,
                        EntryKind::Done,
                        None,
                        ToolArgs::new(),
                        summary.clone(),
                    ));
                    return Outcome {
                        status: OutcomeStatus::Done,
                        report: summary,
                        steps,
                        state,
                    };
                }
                Ok(Decision::Invalid { raw }) => {
                    warn!("Invalid decision: {}", truncate_chars(&raw, 200));
                    state.push(HistoryEntry::new(
                        step,
                        EntryKind::Invalid,
                        None,
                        ToolArgs::new(),
                        format!(
                            "{:?}. Answer with TOOL/ARGS/REASON or DONE.",
                            truncate_chars(&raw, HISTORY_SUMMARY_CHARS)
                        ),
                    ));
                    self.emit(AgentEvent::StepError {
                        message: "Unparseable decision".into(),
                    });
                    continue;
                }
                Ok(Decision::ToolCall { name, args, reason }) => (name, args, reason),
            };

            // ACT
            let call = match registry::validate(&name, &args) {
                Ok(call) => call,
                Err(e) => {
                    warn!("Rejected {}: {}", name, e);
                    state.push(HistoryEntry::new(
                        step,
                        EntryKind::Rejected,
                        Some(name),
                        args,
                        format!("{}. Check the tool list and required args, then retry.", e),
                    ));
                    self.emit(AgentEvent::StepError {
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(hint) = state.redundancy(&call) {
                info!("Skipping {}: {}", call.tool, hint);
                self.emit(AgentEvent::Step {
                    number: step,
                    description: format!("skipped {}", call),
                });
                state.push(HistoryEntry::new(
                    step,
                    EntryKind::Skipped,
                    Some(call.tool.to_string()),
                    call.args,
                    hint,
                ));
                continue;
            }

            let (call, kind) = if state.stuck().is_stuck() {
                warn!(
                    "Stuck: {} analyses without progress, forcing scroll instead of {}",
                    state.stuck().analysis_streak(),
                    call
                );
                state.stuck_mut().reset();
                let scroll = ToolCall::new(
                    ToolName::ScrollPage,
                    ToolArgs::new().with("direction", "down"),
                );
                (scroll, EntryKind::ForcedScroll)
            } else {
                if let Some(reason) = &reason {
                    info!("{} ({})", call, reason);
                }
                (call, EntryKind::Executed)
            };
            state.stuck_mut().record(call.tool);

            self.emit(AgentEvent::Step {
                number: step,
                description: call.to_string(),
            });
            let result = registry::dispatch(&mut self.executor, &call).await;
            info!("{} → {}: {}", call.tool, result.status, truncate_chars(&result.message, 200));

            // OBSERVE
            state.observe(&call, &result);
            state.push(HistoryEntry::new(
                step,
                kind,
                Some(call.tool.to_string()),
                call.args.clone(),
                result.summary(HISTORY_SUMMARY_CHARS),
            ));
            if !result.status.is_ok() {
                self.emit(AgentEvent::StepError {
                    message: format!("{}: {}", call.tool, result.message),
                });
            }

            let click = matches!(call.tool, ToolName::ClickText | ToolName::ClickElement);
            if click && matches!(result.status, Status::Failed | Status::Error) {
                self.recover(&mut state, step).await;
            }
        }

        warn!("Reached max steps ({})", max_steps);
        let page = self.describe_page(task).await;
        Outcome {
            status: OutcomeStatus::Timeout,
            report: format!("Reached maximum step limit ({}). {}", max_steps, page),
            steps,
            state,
        }
    }

    /// One read-only analysis after a failed click, recorded without consuming a step.
    async fn recover(&mut self, state: &mut OrchestratorState, step: usize) {
        info!("Click failed. Re-analyzing to find clickable alternatives...");
        let mut call = ToolCall::new(
            ToolName::AnalyzePage,
            ToolArgs::new().with("question", RECOVERY_QUESTION),
        );
        let mut result = registry::dispatch(&mut self.executor, &call).await;
        if !result.status.is_ok() {
            call = ToolCall::new(ToolName::ListClickableElements, ToolArgs::new());
            result = registry::dispatch(&mut self.executor, &call).await;
        }
        state.push(HistoryEntry::new(
            step,
            EntryKind::Recovery,
            Some(call.tool.to_string()),
            call.args,
            result.summary(RECOVERY_SUMMARY_CHARS),
        ));
    }

    /// Best-effort description of the current page for a degraded report.
    async fn describe_page(&mut self, task: &str) -> String {
        let question = format!("Summarize what you see on this page for the task: {}", task.trim());
        let analysis = self.executor.analyze_page(&question).await;
        if let Some(text) = ok_field(&analysis, "analysis") {
            return format!("Current page: {}", text);
        }
        let extracted = self.executor.extract_text().await;
        match ok_field(&extracted, "text") {
            Some(text) => format!("Current page text: {}", text),
            None => format!("Could not describe the current page: {}", analysis.message),
        }
    }
}

fn ok_field(result: &ActionResult, key: &str) -> Option<String> {
    result
        .status
        .is_ok()
        .then(|| result.get_str(key).map(String::from))
        .flatten()
}
