//! Drive a live browser through open-ended investigative tasks.
//!
//! The crate has two halves. The [`executor`] turns one named browser action
//! into exactly one [`types::ActionResult`], and the [`orchestrator`] runs the
//! bounded think/act/observe loop that asks a [`brain::DecisionMaker`] what to
//! do next, suppresses redundant actions and forces progress when stuck.

pub mod brain;
pub mod chrome;
pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod retry;
pub mod stability;
pub mod state;
pub mod types;
pub mod vision;

pub use brain::{Decision, DecisionMaker, OpenAiBrain};
pub use config::Config;
pub use error::{ContractError, ServiceError};
pub use executor::{Executor, ExecutorConfig};
pub use hands::{BrowserConnector, PageDriver, Session, Target};
pub use orchestrator::{AgentConfig, AgentEvent, Orchestrator, Outcome, OutcomeStatus};
pub use prompt::Preset;
pub use registry::{ToolCall, ToolName};
pub use retry::RetryPolicy;
pub use stability::{Readiness, StabilityConfig, StabilityDetector};
pub use state::{HistoryEntry, OrchestratorState};
pub use types::{ActionResult, ClickableElement, Status, ToolArgs};
pub use vision::{OpenAiVision, VisionAnalyzer};
