//! The browser session and the capability interface it is driven through.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::types::{PageMetrics, RawClickable};

/// How to find one element on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Accessible role (`link` or `button`) with an exact accessible name.
    Role { role: String, name: String },
    /// Element whose visible text equals the string.
    ExactText(String),
    /// Element whose visible text contains the string, case-insensitively.
    PartialText(String),
    /// Generic text locator: the element owning a text node that contains the string.
    TextLocator(String),
    /// Nearest interactive ancestor (up to 8 levels) of a text node containing the string.
    ClickableAncestor(String),
    /// First visible element matching a CSS selector.
    Css(String),
}

impl Target {
    pub fn link(name: &str) -> Self {
        Target::Role {
            role: "link".into(),
            name: name.into(),
        }
    }

    pub fn button(name: &str) -> Self {
        Target::Role {
            role: "button".into(),
            name: name.into(),
        }
    }

    /// Strategy label reported back to the decision-maker.
    pub fn strategy(&self) -> &'static str {
        match self {
            Target::Role { role, .. } if role == "link" => "link",
            Target::Role { .. } => "button",
            Target::ExactText(_) => "exact text",
            Target::PartialText(_) => "partial text",
            Target::TextLocator(_) => "locator",
            Target::ClickableAncestor(_) => "container",
            Target::Css(_) => "selector",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Role { role, name } => write!(f, "{role} \"{name}\""),
            Target::ExactText(t) => write!(f, "text \"{t}\""),
            Target::PartialText(t) => write!(f, "text containing \"{t}\""),
            Target::TextLocator(t) => write!(f, "text={t}"),
            Target::ClickableAncestor(t) => write!(f, "clickable container of \"{t}\""),
            Target::Css(sel) => write!(f, "{sel}"),
        }
    }
}

/// Primitive operations against one live page.
///
/// Implementations report failures as `Err`; the executor turns them into
/// [`crate::types::ActionResult`]s.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn current_url(&self) -> Result<String>;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Visible text of `<body>`.
    async fn body_text(&self) -> Result<String>;

    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// Click the element `target` resolves to. Returns the clicked tag name.
    async fn click(&self, target: &Target, timeout: Duration) -> Result<String>;

    /// Move the pointer over `target`. Returns the computed cursor style.
    async fn hover(&self, target: &Target, timeout: Duration) -> Result<String>;

    /// Replace the value of the input `target` resolves to.
    async fn fill(&self, target: &Target, value: &str) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn scroll_by(&self, delta_y: i64) -> Result<()>;

    async fn metrics(&self) -> Result<PageMetrics>;

    /// Visible elements matching each selector, at most `per_selector` each.
    async fn clickables(&self, selectors: &[&str], per_selector: usize) -> Result<Vec<RawClickable>>;
}

/// Opens a page on the browser automation surface.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>>;
}

/// What [`Session::connect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// The existing page answered and was kept.
    Reused,
    /// A new page handle was opened (first connect, or the old one was dead).
    Established,
}

/// The single live browser connection and its current page.
pub struct Session {
    connector: Arc<dyn BrowserConnector>,
    page: Option<Arc<dyn PageDriver>>,
}

impl Session {
    pub fn new(connector: Arc<dyn BrowserConnector>) -> Self {
        Self {
            connector,
            page: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.page.is_some()
    }

    pub(crate) fn page(&self) -> Option<Arc<dyn PageDriver>> {
        self.page.clone()
    }

    /// Connect, keeping a live page and silently replacing a dead one.
    pub async fn connect(&mut self) -> Result<Connection> {
        if let Some(page) = &self.page {
            match page.current_url().await {
                Ok(url) => {
                    debug!("Session already connected ({})", url);
                    return Ok(Connection::Reused);
                }
                Err(e) => {
                    warn!("Existing page is unresponsive, reconnecting: {:#}", e);
                    self.page = None;
                }
            }
        }

        let page = self.connector.connect().await?;
        self.page = Some(page);
        info!("Browser session established");
        Ok(Connection::Established)
    }

    pub fn disconnect(&mut self) {
        if self.page.take().is_some() {
            info!("Browser session closed");
        }
    }
}
