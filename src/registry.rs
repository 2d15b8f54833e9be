//! Static tool registry: wire names, descriptions, required arguments and dispatch.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ContractError;
use crate::executor::Executor;
use crate::types::{ActionResult, ToolArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ConnectBrowser,
    Navigate,
    Login,
    ClickText,
    HoverText,
    ListClickableElements,
    ExploreSection,
    ExtractText,
    ScrollPage,
    GetPageMetrics,
    WaitForPage,
    WaitForDashboard,
    WaitSeconds,
    AnalyzePage,
    ClickElement,
    TakeScreenshot,
}

/// How a tool counts for stuck detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Reads or waits without changing what is on screen.
    Analysis,
    /// Clicks or scrolls.
    Progress,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub required: &'static [&'static str],
    /// Optional arguments with their defaults, for the catalogue.
    pub optional: &'static str,
}

const SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: ToolName::ConnectBrowser,
        description: "Connect to the Chrome browser (do this first).",
        required: &[],
        optional: "",
    },
    ToolSpec {
        name: ToolName::Navigate,
        description: "Go to a URL. Reports whether a login page was detected.",
        required: &["url"],
        optional: "",
    },
    ToolSpec {
        name: ToolName::Login,
        description: "Fill and submit the login form on the current page.",
        required: &[],
        optional: "username, password (default: configured credentials)",
    },
    ToolSpec {
        name: ToolName::ClickText,
        description: "Click an element by its visible text. Tries link, button, text and container strategies.",
        required: &["text"],
        optional: "exact (default true)",
    },
    ToolSpec {
        name: ToolName::HoverText,
        description: "Hover visible text and report the cursor style (pointer means clickable).",
        required: &["text"],
        optional: "exact (default true)",
    },
    ToolSpec {
        name: ToolName::ListClickableElements,
        description: "List clickable links, buttons and cards, ranked by likely importance.",
        required: &[],
        optional: "section_keyword",
    },
    ToolSpec {
        name: ToolName::ExploreSection,
        description: "Vision breakdown of one named section: clickable items, priorities, red flags.",
        required: &["section_name"],
        optional: "",
    },
    ToolSpec {
        name: ToolName::ExtractText,
        description: "Read the visible page text (first 3000 characters).",
        required: &[],
        optional: "",
    },
    ToolSpec {
        name: ToolName::ScrollPage,
        description: "Scroll one page and report whether the position changed.",
        required: &[],
        optional: "direction: up|down (default down)",
    },
    ToolSpec {
        name: ToolName::GetPageMetrics,
        description: "Scroll height, viewport height and scroll position.",
        required: &[],
        optional: "",
    },
    ToolSpec {
        name: ToolName::WaitForPage,
        description: "Wait until screenshots stop changing and content is present.",
        required: &[],
        optional: "max_wait seconds (default 30, max 120)",
    },
    ToolSpec {
        name: ToolName::WaitForDashboard,
        description: "Wait until dashboard panels show numbers and the page is stable.",
        required: &[],
        optional: "max_wait seconds (default 45, max 120)",
    },
    ToolSpec {
        name: ToolName::WaitSeconds,
        description: "Plain wait. Prefer wait_for_page or wait_for_dashboard.",
        required: &[],
        optional: "seconds (default 5, max 60)",
    },
    ToolSpec {
        name: ToolName::AnalyzePage,
        description: "Answer a question about the current screen using vision.",
        required: &["question"],
        optional: "",
    },
    ToolSpec {
        name: ToolName::ClickElement,
        description: "Click an element described in words; vision finds its text first.",
        required: &["description"],
        optional: "",
    },
    ToolSpec {
        name: ToolName::TakeScreenshot,
        description: "Save a screenshot of the current page to disk.",
        required: &[],
        optional: "description",
    },
];

impl ToolName {
    pub const ALL: [ToolName; 16] = [
        ToolName::ConnectBrowser,
        ToolName::Navigate,
        ToolName::Login,
        ToolName::ClickText,
        ToolName::HoverText,
        ToolName::ListClickableElements,
        ToolName::ExploreSection,
        ToolName::ExtractText,
        ToolName::ScrollPage,
        ToolName::GetPageMetrics,
        ToolName::WaitForPage,
        ToolName::WaitForDashboard,
        ToolName::WaitSeconds,
        ToolName::AnalyzePage,
        ToolName::ClickElement,
        ToolName::TakeScreenshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ConnectBrowser => "connect_browser",
            ToolName::Navigate => "navigate",
            ToolName::Login => "login",
            ToolName::ClickText => "click_text",
            ToolName::HoverText => "hover_text",
            ToolName::ListClickableElements => "list_clickable_elements",
            ToolName::ExploreSection => "explore_section",
            ToolName::ExtractText => "extract_text",
            ToolName::ScrollPage => "scroll_page",
            ToolName::GetPageMetrics => "get_page_metrics",
            ToolName::WaitForPage => "wait_for_page",
            ToolName::WaitForDashboard => "wait_for_dashboard",
            ToolName::WaitSeconds => "wait_seconds",
            ToolName::AnalyzePage => "analyze_page",
            ToolName::ClickElement => "click_element",
            ToolName::TakeScreenshot => "take_screenshot",
        }
    }

    pub fn spec(self) -> &'static ToolSpec {
        // SPECS lists every variant in declaration order.
        &SPECS[self as usize]
    }

    pub fn class(self) -> ToolClass {
        match self {
            ToolName::AnalyzePage
            | ToolName::ExploreSection
            | ToolName::ListClickableElements
            | ToolName::WaitForPage
            | ToolName::WaitForDashboard => ToolClass::Analysis,
            ToolName::ClickText | ToolName::ClickElement | ToolName::ScrollPage => {
                ToolClass::Progress
            }
            _ => ToolClass::Neutral,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ContractError::UnknownTool(wanted.to_string()))
    }
}

/// A tool call that passed the contract check.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: ToolName,
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(tool: ToolName, args: ToolArgs) -> Self {
        Self { tool, args }
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tool, self.args)
    }
}

/// Resolve `name` and check its required arguments.
pub fn validate(name: &str, args: &ToolArgs) -> Result<ToolCall, ContractError> {
    let tool: ToolName = name.parse()?;
    let missing: Vec<String> = tool
        .spec()
        .required
        .iter()
        .filter(|key| args.is_missing(key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ContractError::MissingArgs {
            tool: tool.to_string(),
            missing,
        });
    }
    Ok(ToolCall::new(tool, args.clone()))
}

/// Run a validated call on the executor.
pub async fn dispatch(executor: &mut Executor, call: &ToolCall) -> ActionResult {
    let args = &call.args;
    // Required arguments were checked by `validate`.
    let required = |key: &str| args.str(key).unwrap_or_default();
    match call.tool {
        ToolName::ConnectBrowser => executor.connect().await,
        ToolName::Navigate => executor.navigate(required("url")).await,
        ToolName::Login => executor.login(args.str("username"), args.str("password")).await,
        ToolName::ClickText => {
            executor
                .click_text(required("text"), args.bool_or("exact", true))
                .await
        }
        ToolName::HoverText => {
            executor
                .hover_text(required("text"), args.bool_or("exact", true))
                .await
        }
        ToolName::ListClickableElements => {
            executor
                .list_clickable_elements(args.str("section_keyword"))
                .await
        }
        ToolName::ExploreSection => executor.explore_section(required("section_name")).await,
        ToolName::ExtractText => executor.extract_text().await,
        ToolName::ScrollPage => {
            executor
                .scroll_page(args.str("direction").unwrap_or("down"))
                .await
        }
        ToolName::GetPageMetrics => executor.get_page_metrics().await,
        ToolName::WaitForPage => executor.wait_for_page(args.u64_or("max_wait", 30)).await,
        ToolName::WaitForDashboard => {
            executor
                .wait_for_dashboard(args.u64_or("max_wait", 45))
                .await
        }
        ToolName::WaitSeconds => executor.wait_seconds(args.u64_or("seconds", 5)).await,
        ToolName::AnalyzePage => executor.analyze_page(required("question")).await,
        ToolName::ClickElement => executor.click_element(required("description")).await,
        ToolName::TakeScreenshot => {
            executor
                .take_screenshot(args.str("description").unwrap_or("current page"))
                .await
        }
    }
}

/// Every registered tool, in catalogue order.
pub fn catalogue() -> &'static [ToolSpec] {
    SPECS
}
