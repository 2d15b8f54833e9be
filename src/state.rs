//! Cumulative session state kept by the decision loop.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{ToolCall, ToolClass, ToolName};
use crate::types::{ActionResult, Status, ToolArgs};

/// Capacity of the recent-tools ring.
pub const RECENT_TOOLS: usize = 10;

/// What kind of loop iteration produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Executed,
    /// Contract violation: unknown tool or missing argument.
    Rejected,
    /// Redundant call suppressed without touching the browser.
    Skipped,
    /// Scroll forced by stuck detection.
    ForcedScroll,
    /// Unparseable decision.
    Invalid,
    /// Supplementary analysis after a failed click. Does not consume a step.
    Recovery,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub step: usize,
    pub kind: EntryKind,
    pub tool: Option<String>,
    pub args: ToolArgs,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(step: usize, kind: EntryKind, tool: Option<String>, args: ToolArgs, summary: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            tool,
            args,
            summary: summary.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let call = match &self.tool {
            Some(tool) => format!("{}({})", tool, self.args),
            None => String::new(),
        };
        match self.kind {
            EntryKind::Executed => write!(f, "Step {}: {} → {}", self.step, call, self.summary),
            EntryKind::Rejected => write!(f, "Step {}: ERROR - {}", self.step, self.summary),
            EntryKind::Skipped => write!(f, "Step {}: SKIPPED {} - {}", self.step, call, self.summary),
            EntryKind::ForcedScroll => write!(
                f,
                "Step {}: AUTO-SCROLL (stuck detection) → {}",
                self.step, self.summary
            ),
            EntryKind::Invalid => write!(f, "Step {}: ERROR - invalid decision: {}", self.step, self.summary),
            EntryKind::Recovery => write!(f, "Auto-analysis after click failure: {}", self.summary),
            EntryKind::Done => write!(f, "DONE: {}", self.summary),
        }
    }
}

/// Counts consecutive analysis-class actions between progress-class ones.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    recent: VecDeque<ToolName>,
    analysis_streak: u32,
    threshold: u32,
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            recent: VecDeque::with_capacity(RECENT_TOOLS),
            analysis_streak: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record(&mut self, tool: ToolName) {
        if self.recent.len() == RECENT_TOOLS {
            self.recent.pop_front();
        }
        self.recent.push_back(tool);
        match tool.class() {
            ToolClass::Analysis => self.analysis_streak += 1,
            ToolClass::Progress => self.analysis_streak = 0,
            ToolClass::Neutral => {}
        }
    }

    /// Whether the next action must be replaced by a forced scroll.
    pub fn is_stuck(&self) -> bool {
        self.analysis_streak >= self.threshold
    }

    pub fn reset(&mut self) {
        self.analysis_streak = 0;
    }

    pub fn analysis_streak(&self) -> u32 {
        self.analysis_streak
    }

    pub fn recent_tools(&self) -> impl Iterator<Item = ToolName> + '_ {
        self.recent.iter().copied()
    }
}

/// Everything the loop knows about the session, mutated only after an action completes.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub connected: bool,
    pub logged_in: bool,
    pub dashboard_ready: bool,
    pub current_url: Option<String>,
    history: Vec<HistoryEntry>,
    stuck: StuckDetector,
}

impl OrchestratorState {
    pub fn new(stuck_threshold: u32) -> Self {
        Self {
            connected: false,
            logged_in: false,
            dashboard_ready: false,
            current_url: None,
            history: Vec::new(),
            stuck: StuckDetector::new(stuck_threshold),
        }
    }

    /// Fold one executed call's result into the flags.
    pub fn observe(&mut self, call: &ToolCall, result: &ActionResult) {
        match call.tool {
            ToolName::ConnectBrowser if result.status == Status::Success => self.connected = true,
            ToolName::Navigate => {
                // navigate auto-connects
                if result.status == Status::Success {
                    self.connected = true;
                    self.current_url = call.args.str("url").map(String::from);
                    self.dashboard_ready = false;
                }
            }
            ToolName::Login if result.status == Status::Success => {
                self.logged_in = true;
                self.dashboard_ready = false;
            }
            ToolName::WaitForDashboard if result.status == Status::Ready => {
                self.dashboard_ready = true;
            }
            _ => {}
        }
    }

    /// Whether `call` would repeat something already in effect. Returns the skip hint.
    pub fn redundancy(&self, call: &ToolCall) -> Option<String> {
        match call.tool {
            ToolName::ConnectBrowser if self.connected => {
                Some("already connected. DO SOMETHING ELSE.".to_string())
            }
            ToolName::Navigate => {
                let url = call.args.str("url")?;
                let current = self.current_url.as_deref()?;
                (url == current).then(|| {
                    format!(
                        "already at {}. Use wait_for_dashboard or explore_section instead.",
                        current
                    )
                })
            }
            _ => None,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The last `n` entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn stuck(&self) -> &StuckDetector {
        &self.stuck
    }

    pub fn stuck_mut(&mut self) -> &mut StuckDetector {
        &mut self.stuck
    }

    pub fn summary_block(&self) -> String {
        format!(
            "CURRENT STATE:\n- Connected: {}\n- Current URL: {}\n- Logged in: {}\n- Dashboard ready: {}",
            self.connected,
            self.current_url.as_deref().unwrap_or("None"),
            self.logged_in,
            self.dashboard_ready
        )
    }
}
