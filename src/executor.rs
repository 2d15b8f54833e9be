//! The Action Executor: one named browser action in, one [`ActionResult`] out.
//!
//! Nothing here returns `Err` or panics past the public methods. Every
//! browser or service failure is folded into the result's `status`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::dom;
use crate::hands::{Connection, PageDriver, Session, Target};
use crate::stability::{PollSample, PollVerdict, Readiness, StabilityConfig, StabilityDetector, content_hash};
use crate::types::{ActionResult, Status, truncate_chars};
use crate::vision::VisionAnalyzer;

const NOT_CONNECTED: &str = "Browser not connected. Call connect_browser first.";
const LOGIN_HINT: &str = "Login page detected! Call the login tool with username and password.";

/// Timeouts, settle delays and limits of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Per-strategy click and hover timeout.
    pub click_timeout: Duration,
    pub navigate_timeout: Duration,
    /// Pause after navigation for AJAX content.
    pub navigate_settle: Duration,
    /// Pause after a successful click.
    pub click_settle: Duration,
    /// Pause after submitting a login form.
    pub login_settle: Duration,
    pub screenshot_dir: PathBuf,
    /// Cap on `extract_text` output, in chars.
    pub text_cap: usize,
    /// Cap on `list_clickable_elements` output.
    pub max_clickables: usize,
    /// Lowercase words that move a clickable up the ranking.
    pub priority_keywords: Vec<String>,
    pub max_plain_wait: Duration,
    /// Pixels moved by one scripted scroll.
    pub scroll_step: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            click_timeout: Duration::from_secs(5),
            navigate_timeout: Duration::from_secs(30),
            navigate_settle: Duration::from_secs(5),
            click_settle: Duration::from_secs(2),
            login_settle: Duration::from_secs(10),
            screenshot_dir: PathBuf::from("screenshots"),
            text_cap: 3000,
            max_clickables: 30,
            priority_keywords: vec!["wireless".into(), "controller".into()],
            max_plain_wait: Duration::from_secs(60),
            scroll_step: 600,
        }
    }
}

/// Ordered click strategies for `text`. Partial matching only when `exact` is off.
pub fn click_strategies(text: &str, exact: bool) -> Vec<Target> {
    let mut targets = hover_strategies(text, exact);
    targets.push(Target::ClickableAncestor(text.to_string()));
    targets
}

fn hover_strategies(text: &str, exact: bool) -> Vec<Target> {
    let mut targets = vec![
        Target::link(text),
        Target::button(text),
        Target::ExactText(text.to_string()),
    ];
    if !exact {
        targets.push(Target::PartialText(text.to_string()));
    }
    targets.push(Target::TextLocator(text.to_string()));
    targets
}

/// Executes browser actions against the single [`Session`].
pub struct Executor {
    session: Session,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    credentials: Credentials,
    stability: StabilityConfig,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        session: Session,
        vision: Option<Arc<dyn VisionAnalyzer>>,
        credentials: Credentials,
        stability: StabilityConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            session,
            vision,
            credentials,
            stability,
            config,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn page(&self) -> Result<Arc<dyn PageDriver>, ActionResult> {
        self.session
            .page()
            .ok_or_else(|| ActionResult::new(Status::NotReady, NOT_CONNECTED))
    }

    pub async fn connect(&mut self) -> ActionResult {
        info!("connect_browser()");
        match self.session.connect().await {
            Ok(Connection::Reused) => ActionResult::success("Already connected to browser"),
            Ok(Connection::Established) => {
                ActionResult::success("Successfully connected to Chrome browser")
            }
            Err(e) => {
                warn!("Connect failed: {:#}", e);
                ActionResult::failed(format!("Failed to connect: {:#}", e))
            }
        }
    }

    pub fn disconnect(&mut self) -> ActionResult {
        self.session.disconnect();
        ActionResult::success("Disconnected from browser")
    }

    pub async fn navigate(&mut self, url: &str) -> ActionResult {
        info!("navigate(url={:?})", url);
        let url = url.trim();
        if url.is_empty() {
            return ActionResult::error("navigate requires a non-empty url");
        }

        if !self.session.is_connected() {
            let connected = self.connect().await;
            if connected.status != Status::Success {
                return ActionResult::error(connected.message);
            }
        }
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };

        let outcome = page.goto(url, self.config.navigate_timeout).await;
        if outcome.is_ok() {
            debug!("Page DOM loaded, waiting for content...");
            sleep(self.config.navigate_settle).await;
        }
        let login_detected = detect_login(page.as_ref()).await;

        match outcome {
            Ok(()) => {
                let mut result = ActionResult::success(format!("Navigated to {}", url))
                    .with("url", url)
                    .with("login_page_detected", login_detected);
                if login_detected {
                    result = result.with("hint", LOGIN_HINT);
                }
                result
            }
            Err(e) => {
                warn!("Navigation to {} failed: {:#}", url, e);
                ActionResult::error(format!("Navigation failed: {:#}", e))
                    .with("url", url)
                    .with("login_page_detected", login_detected)
            }
        }
    }

    /// Fill and submit a login form. Blank arguments fall back to the configured credentials.
    pub async fn login(&mut self, username: Option<&str>, password: Option<&str>) -> ActionResult {
        info!("login(username={:?})", username.unwrap_or("(from env)"));
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        let username = username.unwrap_or(self.credentials.username.as_str()).to_string();
        let password = password.unwrap_or(self.credentials.password.as_str()).to_string();

        sleep(self.config.click_settle).await;

        let Some(password_field) = first_visible(page.as_ref(), dom::PASSWORD_SELECTORS).await else {
            return ActionResult::new(Status::NoLogin, "No login form detected on this page");
        };
        let Some(username_field) = first_visible(page.as_ref(), dom::USERNAME_SELECTORS).await else {
            return ActionResult::error("Found password field but no username field");
        };
        debug!("Login fields: {} / {}", username_field, password_field);

        let filled = async {
            page.fill(&Target::Css(username_field.clone()), &username).await?;
            page.fill(&Target::Css(password_field.clone()), &password).await
        };
        if let Err(e) = filled.await {
            return ActionResult::error(format!("Login failed: {:#}", e));
        }

        if !self.submit_login(page.as_ref()).await {
            debug!("No submit button found, pressing Enter");
            if let Err(e) = page.press_key("Enter").await {
                return ActionResult::error(format!("Login failed: {:#}", e));
            }
        }

        info!("Waiting for login to complete ({:?})", self.config.login_settle);
        sleep(self.config.login_settle).await;

        if detect_login(page.as_ref()).await {
            ActionResult::new(
                Status::LoginFailed,
                "Login may have failed - still on login page. Check credentials.",
            )
        } else {
            ActionResult::success("Login successful! Page loaded after login.")
        }
    }

    async fn submit_login(&self, page: &dyn PageDriver) -> bool {
        let by_selector = dom::SUBMIT_SELECTORS.iter().map(|s| Target::Css(s.to_string()));
        let by_label = dom::SUBMIT_LABELS.iter().map(|l| Target::button(l));
        for target in by_selector.chain(by_label) {
            if let Target::Css(sel) = &target {
                if !page.is_visible(sel).await.unwrap_or(false) {
                    continue;
                }
            }
            match page.click(&target, self.config.click_timeout).await {
                Ok(_) => {
                    debug!("Clicked submit: {}", target);
                    return true;
                }
                Err(e) => debug!("Submit via {} failed: {:#}", target, e),
            }
        }
        false
    }

    pub async fn click_text(&mut self, text: &str, exact: bool) -> ActionResult {
        info!("click_text(text={:?}, exact={})", text, exact);
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        match self.run_click_chain(page.as_ref(), text, exact).await {
            Some(strategy) => ActionResult::success(format!("Clicked '{}'", text))
                .with("clicked", text)
                .with("strategy", strategy),
            None => ActionResult::failed(format!("Could not click text: {}", text)),
        }
    }

    /// Try each strategy in order; the first successful click wins.
    async fn run_click_chain(&self, page: &dyn PageDriver, text: &str, exact: bool) -> Option<String> {
        for target in click_strategies(text, exact) {
            debug!("Trying {}...", target.strategy());
            match page.click(&target, self.config.click_timeout).await {
                Ok(tag) => {
                    sleep(self.config.click_settle).await;
                    let strategy = match target {
                        Target::ClickableAncestor(_) => format!("container ({})", tag),
                        _ => target.strategy().to_string(),
                    };
                    info!("Clicked '{}' via {}", text, strategy);
                    return Some(strategy);
                }
                Err(e) => debug!("{} failed: {:#}", target.strategy(), e),
            }
        }
        warn!("All click strategies failed for '{}'", text);
        None
    }

    pub async fn hover_text(&mut self, text: &str, exact: bool) -> ActionResult {
        info!("hover_text(text={:?}, exact={})", text, exact);
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        for target in hover_strategies(text, exact) {
            match page.hover(&target, self.config.click_timeout).await {
                Ok(cursor) => {
                    let likely_clickable = cursor == "pointer";
                    return ActionResult::success(format!("Hovered '{}'", text))
                        .with("hovered", text)
                        .with("strategy", target.strategy())
                        .with("cursor_style", cursor)
                        .with("likely_clickable", likely_clickable);
                }
                Err(e) => debug!("hover via {} failed: {:#}", target.strategy(), e),
            }
        }
        ActionResult::failed(format!("Could not find text to hover: {}", text))
    }

    /// Scroll one page. Reports `did_scroll=false` instead of failing.
    pub async fn scroll_page(&mut self, direction: &str) -> ActionResult {
        info!("scroll_page(direction={:?})", direction);
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        let up = direction.trim().eq_ignore_ascii_case("up");
        let direction = if up { "up" } else { "down" };

        let start = page.metrics().await.ok();
        let key = if up { "PageUp" } else { "PageDown" };
        let mut moved = match page.press_key(key).await {
            Ok(()) => scroll_position_changed(page.as_ref(), start.map(|m| m.scroll_top)).await,
            Err(e) => {
                debug!("{} key failed: {:#}", key, e);
                false
            }
        };
        if !moved {
            let delta = if up { -self.config.scroll_step } else { self.config.scroll_step };
            if let Err(e) = page.scroll_by(delta).await {
                debug!("Scripted scroll failed: {:#}", e);
            }
            moved = scroll_position_changed(page.as_ref(), start.map(|m| m.scroll_top)).await;
        }

        let end = page.metrics().await.ok();
        let start_y = start.map(|m| m.scroll_top).unwrap_or(0);
        let end_y = end.map(|m| m.scroll_top).unwrap_or(start_y);
        let scrolled = (end_y - start_y).unsigned_abs();
        let did_scroll = moved && scrolled > 0;

        let message = if did_scroll {
            format!("Scrolled {} {}px", direction, scrolled)
        } else {
            format!("Scroll {} executed (position did not change)", direction)
        };
        let mut result = ActionResult::success(message)
            .with("direction", direction)
            .with("scrolled_pixels", scrolled)
            .with("new_scroll_top", end_y)
            .with("did_scroll", did_scroll);
        if let Some(m) = end {
            result = result.with("scroll_height", m.scroll_height);
        }
        result
    }

    pub async fn extract_text(&mut self) -> ActionResult {
        info!("extract_text()");
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        match page.body_text().await {
            Ok(text) => {
                let text = truncate_chars(&text, self.config.text_cap);
                let length = text.chars().count();
                debug!("Extracted {} characters", length);
                ActionResult::success(format!("Extracted {} characters", length))
                    .with("text", text)
                    .with("length", length)
            }
            Err(e) => ActionResult::error(format!("Extract failed: {:#}", e)),
        }
    }

    /// Ranked clickable candidates, optionally only those near `section_keyword`.
    pub async fn list_clickable_elements(&mut self, section_keyword: Option<&str>) -> ActionResult {
        info!("list_clickable_elements(section_keyword={:?})", section_keyword);
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        let (raw, note) = match page
            .clickables(dom::CLICKABLE_SELECTORS, dom::PER_SELECTOR_LIMIT)
            .await
        {
            Ok(raw) => (raw, None),
            Err(e) => {
                warn!("Clickable harvest failed: {:#}", e);
                (Vec::new(), Some(format!("harvest failed: {:#}", e)))
            }
        };

        let (total, elements) = dom::rank_clickables(
            raw,
            section_keyword,
            &self.config.priority_keywords,
            self.config.max_clickables,
        );
        let count = elements.len();
        let mut result = ActionResult::success(
            note.unwrap_or_else(|| format!("Found {} clickable elements", count)),
        )
        .with("count", count)
        .with("total_found", total)
        .with("elements", serde_json::to_value(&elements).unwrap_or(Value::Array(Vec::new())))
        .with(
            "hint",
            "Use click_text(text) to click. Use hover_text(text) to check if it's clickable.",
        );
        if let Some(k) = section_keyword.filter(|k| !k.trim().is_empty()) {
            result = result.with("section_keyword", k);
        }
        result
    }

    pub async fn analyze_page(&mut self, question: &str) -> ActionResult {
        info!("analyze_page(question={:?})", truncate_chars(question, 50));
        let prompt = format!(
            "Analyze this screenshot and answer: {question}\n\n\
             Provide a clear, concise answer based on what you see.\n\
             Include specific metrics, numbers, or status indicators if visible."
        );
        match self.ask_vision(&prompt).await {
            Ok(analysis) => ActionResult::success("Analysis complete").with("analysis", analysis),
            Err(r) => r,
        }
    }

    pub async fn explore_section(&mut self, section_name: &str) -> ActionResult {
        info!("explore_section(section_name={:?})", section_name);
        let prompt = format!(
            "Analyze this screenshot focusing on the \"{section_name}\" section.\n\n\
             Provide a detailed breakdown:\n\
             1. SECTION LOCATION: where the \"{section_name}\" section is on the screen.\n\
             2. CLICKABLE ELEMENTS in or near this section, with their exact visible text: \
             links, buttons, cards or panels with numbers (e.g. \"0/1\", \"3/3\"), status indicators.\n\
             3. PRIORITY ORDER: what to click first to find issues, with the exact text and why.\n\
             4. RED FLAGS: indicators showing problems (red icons, \"0/X\" patterns, \"Critical\").\n\n\
             Be specific with exact visible text for clicking."
        );
        match self.ask_vision(&prompt).await {
            Ok(analysis) => ActionResult::success(format!("Explored section {}", section_name))
                .with("section", section_name)
                .with("analysis", analysis)
                .with(
                    "hint",
                    "Use click_text(text) with exact text from the analysis to click elements.",
                ),
            Err(r) => r,
        }
    }

    /// Identify the described element by vision, then click its text through the strategy chain.
    pub async fn click_element(&mut self, description: &str) -> ActionResult {
        info!("click_element(description={:?})", description);
        let prompt = format!(
            "Look at this screenshot and identify the element: \"{description}\"\n\n\
             Return ONLY the exact text visible on the element to click.\n\
             Keep it short and precise. No explanation."
        );
        let answer = match self.ask_vision(&prompt).await {
            Ok(a) => a,
            Err(r) => return r,
        };
        let text = answer
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim()
            .to_string();
        if text.is_empty() {
            return ActionResult::failed(format!("Could not identify: {}", description));
        }
        info!("Identified element text: '{}'", text);

        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        match self.run_click_chain(page.as_ref(), &text, false).await {
            Some(strategy) => ActionResult::success(format!("Clicked '{}'", text))
                .with("clicked", text.as_str())
                .with("strategy", strategy)
                .with("identified_as", text.as_str()),
            None => ActionResult::failed(format!("Could not click: {}", description))
                .with("identified_as", text),
        }
    }

    async fn ask_vision(&self, prompt: &str) -> Result<String, ActionResult> {
        let page = self.page()?;
        let Some(vision) = self.vision.clone() else {
            return Err(ActionResult::error(
                "Vision capability not configured (set OPENAI_API_KEY)",
            ));
        };
        let image = page
            .screenshot()
            .await
            .map_err(|e| ActionResult::error(format!("Screenshot failed: {:#}", e)))?;
        vision
            .analyze_image(&image, prompt)
            .await
            .map_err(|e| ActionResult::error(format!("Analysis failed: {}", e)))
    }

    pub async fn take_screenshot(&mut self, description: &str) -> ActionResult {
        info!("take_screenshot(description={:?})", description);
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        let bytes = match page.screenshot().await {
            Ok(b) => b,
            Err(e) => return ActionResult::error(format!("Screenshot failed: {:#}", e)),
        };

        let dir = &self.config.screenshot_dir;
        let name = format!(
            "screenshot_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let path = dir.join(name);
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &bytes).await
        };
        match written.await {
            Ok(()) => ActionResult::success(format!("Saved screenshot to {}", path.display()))
                .with("file", path.display().to_string())
                .with("description", description),
            Err(e) => ActionResult::error(format!("Could not save {}: {}", path.display(), e)),
        }
    }

    pub async fn get_page_metrics(&mut self) -> ActionResult {
        info!("get_page_metrics()");
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        match page.metrics().await {
            Ok(m) => ActionResult::success("Page metrics")
                .with("scroll_height", m.scroll_height)
                .with("viewport_height", m.viewport_height)
                .with("scroll_top", m.scroll_top),
            Err(e) => ActionResult::error(format!("Metrics failed: {:#}", e)),
        }
    }

    pub async fn wait_for_page(&mut self, max_wait_secs: u64) -> ActionResult {
        info!("wait_for_page(max_wait={})", max_wait_secs);
        self.wait_until_stable(Readiness::Page, max_wait_secs).await
    }

    pub async fn wait_for_dashboard(&mut self, max_wait_secs: u64) -> ActionResult {
        info!("wait_for_dashboard(max_wait={})", max_wait_secs);
        self.wait_until_stable(Readiness::Dashboard, max_wait_secs).await
    }

    async fn wait_until_stable(&self, readiness: Readiness, max_wait_secs: u64) -> ActionResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(r) => return r,
        };
        let max_wait = self.stability.clamp_wait(max_wait_secs);
        let mut detector = StabilityDetector::new(readiness, &self.stability);
        let start = Instant::now();

        while start.elapsed() < max_wait {
            let sample = poll_sample(page.as_ref()).await;
            let verdict = detector.observe(&sample);
            let elapsed = start.elapsed().as_secs();
            let signals = detector.signals();

            match verdict {
                PollVerdict::LoginRequired => {
                    return ActionResult::new(
                        Status::LoginRequired,
                        format!("Login page detected after {}s. Call login() to authenticate.", elapsed),
                    )
                    .with("content_length", signals.text_length)
                    .with("elapsed_seconds", elapsed);
                }
                PollVerdict::Stable { reason } => {
                    let (status, message, hint) = match readiness {
                        Readiness::Page => (
                            Status::Loaded,
                            format!("Page fully loaded and stable after {}s", elapsed),
                            None,
                        ),
                        Readiness::Dashboard => (
                            Status::Ready,
                            format!("Dashboard loaded: {} after {}s", reason, elapsed),
                            Some("Dashboard is ready. Use explore_section() or analyze_page()."),
                        ),
                    };
                    let mut result = ActionResult::new(status, message)
                        .with("elapsed_seconds", elapsed)
                        .with("stable_count", detector.stable_count())
                        .with("content_length", signals.text_length)
                        .with("has_panels", signals.has_panels)
                        .with("screenshot_stable", true);
                    if readiness == Readiness::Dashboard {
                        result = result.with("has_numbers", signals.has_numbers);
                    }
                    if let Some(hint) = hint {
                        result = result.with("hint", hint);
                    }
                    info!("{}", result.message);
                    return result;
                }
                PollVerdict::Pending => debug!(
                    "Waiting... ({}s, stable {}, {} chars, loading={}, panels={})",
                    elapsed,
                    detector.stable_count(),
                    signals.text_length,
                    signals.is_loading,
                    signals.has_panels
                ),
            }

            sleep(self.stability.poll_interval).await;
        }

        let elapsed = start.elapsed().as_secs();
        let (message, hint) = match readiness {
            Readiness::Page => (
                format!("Page may still be loading after {}s. Screenshots not stable.", elapsed),
                "Call wait_for_page again with a longer max_wait, or analyze_page to check the current state.",
            ),
            Readiness::Dashboard => (
                format!("Dashboard panels may still be loading after {}s", elapsed),
                "Try wait_for_dashboard with a longer max_wait, or analyze_page to check the current state.",
            ),
        };
        warn!("{}", message);
        ActionResult::new(Status::Timeout, message)
            .with("elapsed_seconds", elapsed)
            .with("stable_count", detector.stable_count())
            .with("hint", hint)
    }

    pub async fn wait_seconds(&mut self, seconds: u64) -> ActionResult {
        let wait = Duration::from_secs(seconds).min(self.config.max_plain_wait);
        info!("wait_seconds({})", wait.as_secs());
        sleep(wait).await;
        ActionResult::success(format!("Waited {}s", wait.as_secs()))
            .with("waited_seconds", wait.as_secs())
    }
}

async fn first_visible(page: &dyn PageDriver, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        if page.is_visible(sel).await.unwrap_or(false) {
            return Some(sel.to_string());
        }
    }
    None
}

async fn detect_login(page: &dyn PageDriver) -> bool {
    page.is_visible(dom::PASSWORD_PROBE).await.unwrap_or(false)
}

async fn scroll_position_changed(page: &dyn PageDriver, before: Option<i64>) -> bool {
    match (before, page.metrics().await.ok()) {
        (Some(before), Some(after)) => after.scroll_top != before,
        _ => false,
    }
}

/// Capture one stability observation. Failures degrade to empty fields.
async fn poll_sample(page: &dyn PageDriver) -> PollSample {
    let hash = match page.screenshot().await {
        Ok(bytes) => content_hash(&bytes),
        Err(e) => {
            debug!("Poll screenshot failed: {:#}", e);
            String::new()
        }
    };
    let text = page.body_text().await.unwrap_or_default();
    PollSample {
        hash,
        text,
        login_visible: detect_login(page).await,
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("connected", &self.session.is_connected())
            .field("vision", &self.vision.is_some())
            .field("config", &self.config)
            .finish()
    }
}
